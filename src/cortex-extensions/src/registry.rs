//! Tool and command namespace ownership.
//!
//! A name is *claimed* when an extension registers it and *published* once
//! the registration is visible to the host. Claims are exclusive across all
//! extensions; host-reserved tool names can never be claimed.

use std::collections::{BTreeMap, HashSet};

use crate::api::{RuntimeCommand, RuntimeTool};
use crate::{ExtensionError, Result};

/// Which namespace a name lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameKind {
    Tool,
    Command,
}

impl NameKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tool => "Tool",
            Self::Command => "Command",
        }
    }
}

/// Ownership maps plus the published tool and command tables.
#[derive(Debug, Clone, Default)]
pub struct NamespaceRegistry {
    reserved_tools: HashSet<String>,
    tool_owners: BTreeMap<String, String>,
    command_owners: BTreeMap<String, String>,
    tools: BTreeMap<String, RuntimeTool>,
    commands: BTreeMap<String, RuntimeCommand>,
}

impl NamespaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reserved_tools<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reserved_tools.extend(names.into_iter().map(Into::into));
        self
    }

    /// Replace the host-reserved tool names.
    pub fn set_reserved_tools(&mut self, names: HashSet<String>) {
        self.reserved_tools = names;
    }

    pub fn is_reserved_tool(&self, name: &str) -> bool {
        self.reserved_tools.contains(name)
    }

    fn owners(&self, kind: NameKind) -> &BTreeMap<String, String> {
        match kind {
            NameKind::Tool => &self.tool_owners,
            NameKind::Command => &self.command_owners,
        }
    }

    fn owners_mut(&mut self, kind: NameKind) -> &mut BTreeMap<String, String> {
        match kind {
            NameKind::Tool => &mut self.tool_owners,
            NameKind::Command => &mut self.command_owners,
        }
    }

    /// Claim a name for `owner`. Fails if reserved or already claimed,
    /// including by `owner` itself.
    pub fn claim(&mut self, kind: NameKind, name: &str, owner: &str) -> Result<()> {
        if kind == NameKind::Tool && self.is_reserved_tool(name) {
            return Err(ExtensionError::ReservedName(name.to_string()));
        }
        if let Some(existing) = self.owners(kind).get(name) {
            return Err(ExtensionError::NameConflict {
                kind: kind.as_str(),
                name: name.to_string(),
                owner: existing.clone(),
            });
        }
        self.owners_mut(kind)
            .insert(name.to_string(), owner.to_string());
        Ok(())
    }

    /// Release a name if `owner` holds it. Returns whether it was released.
    pub fn release(&mut self, kind: NameKind, name: &str, owner: &str) -> bool {
        if self.owner(kind, name) != Some(owner) {
            return false;
        }
        self.owners_mut(kind).remove(name);
        match kind {
            NameKind::Tool => {
                self.tools.remove(name);
            }
            NameKind::Command => {
                self.commands.remove(name);
            }
        }
        true
    }

    pub fn owner(&self, kind: NameKind, name: &str) -> Option<&str> {
        self.owners(kind).get(name).map(String::as_str)
    }

    /// Names of `kind` claimed by `owner`.
    pub fn owned_by(&self, kind: NameKind, owner: &str) -> Vec<String> {
        self.owners(kind)
            .iter()
            .filter(|(_, o)| o.as_str() == owner)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn tool_owners(&self) -> &BTreeMap<String, String> {
        &self.tool_owners
    }

    pub fn command_owners(&self) -> &BTreeMap<String, String> {
        &self.command_owners
    }

    /// Make a claimed tool visible to the host.
    pub fn publish_tool(&mut self, tool: RuntimeTool) -> Result<()> {
        self.ensure_claimed(NameKind::Tool, &tool.name, &tool.extension_id)?;
        self.tools.insert(tool.name.clone(), tool);
        Ok(())
    }

    /// Make a claimed command visible to the host.
    pub fn publish_command(&mut self, command: RuntimeCommand) -> Result<()> {
        self.ensure_claimed(NameKind::Command, &command.name, &command.extension_id)?;
        self.commands.insert(command.name.clone(), command);
        Ok(())
    }

    fn ensure_claimed(&self, kind: NameKind, name: &str, owner: &str) -> Result<()> {
        match self.owner(kind, name) {
            Some(o) if o == owner => Ok(()),
            Some(o) => Err(ExtensionError::NameConflict {
                kind: kind.as_str(),
                name: name.to_string(),
                owner: o.to_string(),
            }),
            None => Err(ExtensionError::validation(format!(
                "{} '{}' was not claimed by '{}'",
                kind.as_str(),
                name,
                owner
            ))),
        }
    }

    pub fn tool(&self, name: &str) -> Option<&RuntimeTool> {
        self.tools.get(name)
    }

    pub fn tools(&self) -> Vec<RuntimeTool> {
        self.tools.values().cloned().collect()
    }

    pub fn command(&self, name: &str) -> Option<&RuntimeCommand> {
        self.commands.get(name)
    }

    pub fn commands(&self) -> Vec<RuntimeCommand> {
        self.commands.values().cloned().collect()
    }
}
