//! Command registry.
//!
//! Plugin sources export descriptor trees in two shapes (standard, legacy);
//! the loader flattens every nesting level into individual registrations.
//! Aliases map to the identical record; re-registration overwrites silently.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;

use crate::{
    domain::Jid,
    settings::SettingsStore,
    state::SharedState,
    transport::{InboundMessage, TransportPort},
    Result,
};
use tracing::warn;

/// Visibility tier of a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandTier {
    Public,
    OwnerOnly,
}

/// Everything a handler needs to act on one invocation.
#[derive(Clone)]
pub struct CommandContext {
    pub transport: Arc<dyn TransportPort>,
    pub settings: Arc<SettingsStore>,
    pub state: Arc<SharedState>,
    pub args: Vec<String>,
    pub is_owner: bool,
    pub prefix: String,
}

/// Standard calling convention.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn execute(&self, msg: &InboundMessage, ctx: CommandContext) -> Result<()>;
}

/// Legacy calling convention: destination-first, with the original message
/// repackaged into `LegacyArgs`.
#[async_trait]
pub trait LegacyHandler: Send + Sync {
    async fn run(
        &self,
        dest: &Jid,
        transport: Arc<dyn TransportPort>,
        opts: LegacyArgs,
    ) -> Result<()>;
}

#[derive(Clone)]
pub struct LegacyArgs {
    pub arg: Vec<String>,
    pub message: InboundMessage,
}

/// Adapter: presents a legacy handler through the standard convention.
struct LegacyAdapter {
    inner: Arc<dyn LegacyHandler>,
}

#[async_trait]
impl CommandHandler for LegacyAdapter {
    async fn execute(&self, msg: &InboundMessage, ctx: CommandContext) -> Result<()> {
        let opts = LegacyArgs {
            arg: ctx.args.clone(),
            message: msg.clone(),
        };
        self.inner.run(&msg.conversation, ctx.transport.clone(), opts).await
    }
}

/// Standard descriptor shape.
pub struct StandardDescriptor {
    pub name: String,
    pub category: String,
    pub aliases: Vec<String>,
    pub handler: Arc<dyn CommandHandler>,
}

/// Legacy descriptor shape: renamed fields, different handler convention.
pub struct LegacyDescriptor {
    pub nom: String,
    pub categorie: Option<String>,
    pub aliases: Vec<String>,
    pub handler: Arc<dyn LegacyHandler>,
}

/// The closed union of descriptor shapes a source may produce.
pub enum Descriptor {
    Standard(StandardDescriptor),
    Legacy(LegacyDescriptor),
}

impl Descriptor {
    /// Normalize into the standard shape, adapting legacy handlers.
    fn normalize(self) -> StandardDescriptor {
        match self {
            Descriptor::Standard(d) => d,
            Descriptor::Legacy(d) => StandardDescriptor {
                name: d.nom,
                category: d.categorie.unwrap_or_else(|| "other".to_string()),
                aliases: d.aliases,
                handler: Arc::new(LegacyAdapter { inner: d.handler }),
            },
        }
    }
}

/// What a plugin source exports: one descriptor, a sequence, or (nested)
/// named mappings of descriptors.
pub enum DescriptorExport {
    One(Descriptor),
    Many(Vec<DescriptorExport>),
    Named(Vec<(String, DescriptorExport)>),
}

impl DescriptorExport {
    /// Recursive flatten: every valid descriptor regardless of nesting.
    fn collect(self, out: &mut Vec<Descriptor>) {
        match self {
            DescriptorExport::One(d) => out.push(d),
            DescriptorExport::Many(items) => {
                for item in items {
                    item.collect(out);
                }
            }
            DescriptorExport::Named(entries) => {
                for (_, item) in entries {
                    item.collect(out);
                }
            }
        }
    }
}

/// Canonical, immutable registration record. Aliases share the record.
pub struct CommandRecord {
    pub name: String,
    pub category: String,
    pub aliases: Vec<String>,
    pub tier: CommandTier,
    pub handler: Arc<dyn CommandHandler>,
}

/// One visibility tier's name -> record map.
pub struct CommandRegistry {
    tier: CommandTier,
    records: HashMap<String, Arc<CommandRecord>>,
}

impl CommandRegistry {
    pub fn new(tier: CommandTier) -> Self {
        Self {
            tier,
            records: HashMap::new(),
        }
    }

    pub fn tier(&self) -> CommandTier {
        self.tier
    }

    /// Build a registry from plugin exports, skipping invalid descriptors.
    pub fn load(tier: CommandTier, sources: Vec<DescriptorExport>) -> Self {
        let mut registry = Self::new(tier);
        let mut descriptors = Vec::new();
        for source in sources {
            source.collect(&mut descriptors);
        }
        for d in descriptors {
            registry.register(d);
        }
        registry
    }

    /// Register one descriptor. A blank name is an invalid shape: skipped
    /// with a diagnostic, never fatal. Existing names/aliases are silently
    /// overwritten (last write wins).
    pub fn register(&mut self, descriptor: Descriptor) -> bool {
        let d = descriptor.normalize();
        let name = d.name.trim().to_lowercase();
        if name.is_empty() {
            warn!("skipping command descriptor with no name");
            return false;
        }

        let record = Arc::new(CommandRecord {
            name: name.clone(),
            category: d.category,
            aliases: d.aliases.iter().map(|a| a.trim().to_lowercase()).collect(),
            tier: self.tier,
            handler: d.handler,
        });

        self.records.insert(name, record.clone());
        for alias in &record.aliases {
            if alias.is_empty() {
                continue;
            }
            self.records.insert(alias.clone(), record.clone());
        }
        true
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<CommandRecord>> {
        self.records.get(&name.trim().to_lowercase()).cloned()
    }

    /// Distinct records, for menu/help listings.
    pub fn canonical_records(&self) -> Vec<Arc<CommandRecord>> {
        let mut seen: Vec<Arc<CommandRecord>> = Vec::new();
        for record in self.records.values() {
            if !seen.iter().any(|r| Arc::ptr_eq(r, record)) {
                seen.push(record.clone());
            }
        }
        seen.sort_by(|a, b| a.name.cmp(&b.name));
        seen
    }

    pub fn len(&self) -> usize {
        self.canonical_records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
