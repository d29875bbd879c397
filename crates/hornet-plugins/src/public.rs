//! Public-tier commands.

use std::sync::Arc;

use async_trait::async_trait;

use hornet_core::{
    domain::Jid,
    errors::Error,
    registry::{
        CommandContext, CommandHandler, Descriptor, DescriptorExport, LegacyArgs, LegacyDescriptor,
        LegacyHandler, StandardDescriptor,
    },
    transport::{InboundMessage, TransportPort},
    Result,
};

/// Everything the public plugin directory exports.
pub fn public_exports() -> Vec<DescriptorExport> {
    vec![
        DescriptorExport::One(ping()),
        DescriptorExport::Many(vec![
            DescriptorExport::One(dictionary()),
            DescriptorExport::One(owner_card()),
        ]),
        DescriptorExport::Named(vec![
            ("menu".to_string(), DescriptorExport::One(menu())),
            ("say".to_string(), DescriptorExport::One(say())),
        ]),
    ]
}

// ============== ping ==============

struct Ping;

#[async_trait]
impl CommandHandler for Ping {
    async fn execute(&self, msg: &InboundMessage, ctx: CommandContext) -> Result<()> {
        ctx.transport.send_text(&msg.conversation, "Pong!").await
    }
}

fn ping() -> Descriptor {
    Descriptor::Standard(StandardDescriptor {
        name: "ping".to_string(),
        category: "basic".to_string(),
        aliases: vec!["p".to_string()],
        handler: Arc::new(Ping),
    })
}

// ============== dictionary ==============

const DICTIONARY_API: &str = "https://api.dictionaryapi.dev/api/v2/entries/en";

struct Dictionary;

#[async_trait]
impl CommandHandler for Dictionary {
    async fn execute(&self, msg: &InboundMessage, ctx: CommandContext) -> Result<()> {
        let Some(word) = ctx.args.first() else {
            let text = format!(
                "Enter the word to search.\n\nExample: {}dict hello",
                ctx.prefix
            );
            return ctx.transport.send_text(&msg.conversation, &text).await;
        };
        let word = word.to_lowercase();

        let response = reqwest::get(format!("{DICTIONARY_API}/{word}"))
            .await
            .map_err(|e| Error::External(format!("network error: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            let text = format!("Word \"{word}\" not found in the dictionary.");
            return ctx.transport.send_text(&msg.conversation, &text).await;
        }
        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::External(format!("bad dictionary response: {e}")))?;

        let text = format_entry(&payload)
            .unwrap_or_else(|| format!("No usable definition found for \"{word}\"."));
        ctx.transport.send_text(&msg.conversation, &text).await
    }
}

/// Render the first entry of a dictionary API payload.
fn format_entry(payload: &serde_json::Value) -> Option<String> {
    let entry = payload.get(0)?;
    let word = entry.get("word")?.as_str()?;
    let phonetic = entry
        .get("phonetic")
        .and_then(|v| v.as_str())
        .unwrap_or("n/a");
    let meaning = entry.get("meanings")?.get(0)?;
    let part_of_speech = meaning
        .get("partOfSpeech")
        .and_then(|v| v.as_str())
        .unwrap_or("n/a");
    let definition = meaning
        .get("definitions")?
        .get(0)?
        .get("definition")?
        .as_str()?;
    let example = meaning
        .get("definitions")
        .and_then(|d| d.get(0))
        .and_then(|d| d.get("example"))
        .and_then(|v| v.as_str())
        .unwrap_or("No example available");

    Some(format!(
        "Dictionary\n\nWord: {word}\nPronunciation: {phonetic}\n\
         Part of speech: {part_of_speech}\nMeaning: {definition}\nExample: {example}"
    ))
}

fn dictionary() -> Descriptor {
    Descriptor::Standard(StandardDescriptor {
        name: "dictionary".to_string(),
        category: "basic".to_string(),
        aliases: vec![
            "dict".to_string(),
            "define".to_string(),
            "meaning".to_string(),
        ],
        handler: Arc::new(Dictionary),
    })
}

// ============== owner card ==============

struct OwnerCard;

#[async_trait]
impl CommandHandler for OwnerCard {
    async fn execute(&self, msg: &InboundMessage, ctx: CommandContext) -> Result<()> {
        let text = "Contact the bot owner for access or support.".to_string();
        ctx.transport.send_text(&msg.conversation, &text).await
    }
}

fn owner_card() -> Descriptor {
    Descriptor::Standard(StandardDescriptor {
        name: "owner".to_string(),
        category: "basic".to_string(),
        aliases: vec![],
        handler: Arc::new(OwnerCard),
    })
}

// ============== menu ==============

struct Menu;

#[async_trait]
impl CommandHandler for Menu {
    async fn execute(&self, msg: &InboundMessage, ctx: CommandContext) -> Result<()> {
        let p = &ctx.prefix;
        let text = format!(
            "Commands\n\n\
             Basic: {p}ping, {p}dict <word>, {p}say <text>, {p}owner\n\
             Owner tier: {p}status, {p}autoreact, {p}autotyping, {p}autorecording, \
             {p}autoread, {p}abuseguard, {p}badwords, {p}setemoji\n\
             Controls (bot itself): {p}on, {p}off, {p}public, {p}self"
        );
        ctx.transport.send_text(&msg.conversation, &text).await
    }
}

fn menu() -> Descriptor {
    Descriptor::Standard(StandardDescriptor {
        name: "menu".to_string(),
        category: "basic".to_string(),
        aliases: vec!["help".to_string()],
        handler: Arc::new(Menu),
    })
}

// ============== say (legacy shape) ==============

struct Say;

#[async_trait]
impl LegacyHandler for Say {
    async fn run(
        &self,
        dest: &Jid,
        transport: Arc<dyn TransportPort>,
        opts: LegacyArgs,
    ) -> Result<()> {
        let text = if opts.arg.is_empty() {
            "Nothing to say.".to_string()
        } else {
            opts.arg.join(" ")
        };
        transport.send_text(dest, &text).await
    }
}

fn say() -> Descriptor {
    Descriptor::Legacy(LegacyDescriptor {
        nom: "say".to_string(),
        categorie: Some("basic".to_string()),
        aliases: vec!["echo".to_string()],
        handler: Arc::new(Say),
    })
}
