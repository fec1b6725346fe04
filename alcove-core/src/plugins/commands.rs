//! Command palette registry for plugin commands
//!
//! Commands are registered when their owning plugin activates and removed
//! when it deactivates. Ids are global across plugins, so registration
//! checks for conflicts before committing anything.

use parking_lot::Mutex;
use std::collections::HashMap;

use alcove_plugin_api::CommandDefinition;

/// A command registered by a plugin
#[derive(Debug, Clone)]
pub struct RegisteredCommand {
    pub plugin_id: String,
    pub definition: CommandDefinition,
}

/// Registry of all plugin commands, keyed by command id
pub struct CommandRegistry {
    commands: Mutex<HashMap<String, RegisteredCommand>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            commands: Mutex::new(HashMap::new()),
        }
    }

    /// Register a plugin's commands.
    ///
    /// All-or-nothing: if any id is already owned by a different plugin,
    /// nothing is committed and the owning plugin's id is returned.
    pub fn register(
        &self,
        plugin_id: &str,
        definitions: Vec<CommandDefinition>,
    ) -> Result<(), String> {
        let mut commands = self.commands.lock();

        for definition in &definitions {
            if let Some(existing) = commands.get(&definition.id)
                && existing.plugin_id != plugin_id
            {
                return Err(existing.plugin_id.clone());
            }
        }

        for definition in definitions {
            commands.insert(
                definition.id.clone(),
                RegisteredCommand {
                    plugin_id: plugin_id.to_string(),
                    definition,
                },
            );
        }
        Ok(())
    }

    /// Plugin currently owning a command id, if any
    pub fn check_conflict(&self, command_id: &str) -> Option<String> {
        self.commands.lock().get(command_id).map(|c| c.plugin_id.clone())
    }

    pub fn find(&self, command_id: &str) -> Option<RegisteredCommand> {
        self.commands.lock().get(command_id).cloned()
    }

    /// All registered commands, sorted by id for stable palette display
    pub fn all(&self) -> Vec<RegisteredCommand> {
        let commands = self.commands.lock();
        let mut all: Vec<_> = commands.values().cloned().collect();
        all.sort_by(|a, b| a.definition.id.cmp(&b.definition.id));
        all
    }

    /// Remove every command owned by a plugin
    pub fn unregister(&self, plugin_id: &str) {
        self.commands.lock().retain(|_, c| c.plugin_id != plugin_id);
    }

    pub fn len(&self) -> usize {
        self.commands.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(id: &str) -> CommandDefinition {
        CommandDefinition {
            id: id.to_string(),
            title: id.to_string(),
            shortcut: None,
        }
    }

    #[test]
    fn register_and_find() {
        let registry = CommandRegistry::new();
        registry
            .register("notes", vec![command("notes.new"), command("notes.search")])
            .unwrap();

        let found = registry.find("notes.new").unwrap();
        assert_eq!(found.plugin_id, "notes");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn conflicting_id_rejects_whole_batch() {
        let registry = CommandRegistry::new();
        registry.register("notes", vec![command("shared.open")]).unwrap();

        let result = registry.register("tasks", vec![command("tasks.new"), command("shared.open")]);
        assert_eq!(result, Err("notes".to_string()));

        // Nothing from the failed batch was committed
        assert!(registry.find("tasks.new").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn reregistering_own_commands_is_allowed() {
        let registry = CommandRegistry::new();
        registry.register("notes", vec![command("notes.new")]).unwrap();
        registry.register("notes", vec![command("notes.new")]).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unregister_removes_only_that_plugin() {
        let registry = CommandRegistry::new();
        registry.register("notes", vec![command("notes.new")]).unwrap();
        registry.register("tasks", vec![command("tasks.new")]).unwrap();

        registry.unregister("notes");

        assert!(registry.find("notes.new").is_none());
        assert!(registry.find("tasks.new").is_some());
    }

    #[test]
    fn all_is_sorted_by_id() {
        let registry = CommandRegistry::new();
        registry
            .register("z", vec![command("z.last"), command("a.first")])
            .unwrap();

        let ids: Vec<_> = registry.all().iter().map(|c| c.definition.id.clone()).collect();
        assert_eq!(ids, ["a.first", "z.last"]);
    }
}
