//! Named command vocabulary carried over the JSON envelope
//!
//! Every command declares a parameter schema checked by the dispatcher
//! before execution, plus capability bits deciding whether it may run
//! before login. Handlers receive the central manager and the executing
//! user and return the JSON reply body.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::{json, Map, Value};

use crate::error::{ChatError, Result};
use crate::protocol::envelope::{make_error_message, make_success_message, with_field};
use crate::registry::manager::Manager;
use crate::registry::{GroupId, UserId};

/// Capability bit: the command may execute on a connection that has not
/// logged in yet
pub const NORMAL_TYPE: u32 = 0b1;

/// Expected JSON kind of a declared parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Int,
    String,
}

impl ParamKind {
    /// Whether a JSON value satisfies this kind
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParamKind::Int => value.is_i64(),
            ParamKind::String => value.is_string(),
        }
    }
}

/// One entry of the command vocabulary
pub trait Command: Send + Sync {
    /// Declared parameters, name → expected kind
    fn params(&self) -> &'static [(&'static str, ParamKind)];

    /// Capability bits; zero means login is required
    fn command_type(&self) -> u32 {
        0
    }

    /// Run the command for the executing user
    fn execute(&self, manager: &Manager, executor: UserId, params: &Map<String, Value>)
        -> Result<Value>;
}

/// Name → handler table
pub struct CommandRegistry {
    commands: RwLock<HashMap<String, Arc<dyn Command>>>,
}

impl CommandRegistry {
    /// Build the registry with the full server vocabulary installed
    pub fn new() -> Self {
        let registry = Self {
            commands: RwLock::new(HashMap::new()),
        };

        registry.add_command("register", Arc::new(RegisterCommand));
        registry.add_command("has_user", Arc::new(HasUserCommand));
        registry.add_command("search_user", Arc::new(SearchUserCommand));
        registry.add_command("add_friend", Arc::new(AddFriendCommand));
        registry.add_command("add_group", Arc::new(AddGroupCommand));
        registry.add_command("get_friend_list", Arc::new(GetFriendListCommand));
        registry.add_command("get_group_list", Arc::new(GetGroupListCommand));
        registry.add_command("send_friend_message", Arc::new(SendFriendMessageCommand));
        registry.add_command("send_group_message", Arc::new(SendGroupMessageCommand));
        registry.add_command(
            "accept_friend_verification",
            Arc::new(AcceptFriendVerificationCommand),
        );
        registry.add_command(
            "get_friend_verification_list",
            Arc::new(GetFriendVerificationListCommand),
        );
        registry.add_command(
            "accept_group_verification",
            Arc::new(AcceptGroupVerificationCommand),
        );
        registry.add_command(
            "get_group_verification_list",
            Arc::new(GetGroupVerificationListCommand),
        );
        registry.add_command(
            "reject_friend_verification",
            Arc::new(RejectFriendVerificationCommand),
        );
        registry.add_command(
            "reject_group_verification",
            Arc::new(RejectGroupVerificationCommand),
        );
        registry.add_command("create_group", Arc::new(CreateGroupCommand));
        registry.add_command("remove_group", Arc::new(RemoveGroupCommand));
        registry.add_command("leave_group", Arc::new(LeaveGroupCommand));
        registry.add_command("remove_friend", Arc::new(RemoveFriendCommand));

        registry
    }

    /// Install a handler; false when the name is already taken
    pub fn add_command(&self, name: &str, command: Arc<dyn Command>) -> bool {
        let mut commands = self.commands.write().expect("command registry poisoned");
        if commands.contains_key(name) {
            return false;
        }
        commands.insert(name.to_string(), command);
        true
    }

    pub fn has_command(&self, name: &str) -> bool {
        self.commands
            .read()
            .expect("command registry poisoned")
            .contains_key(name)
    }

    pub fn get_command(&self, name: &str) -> Option<Arc<dyn Command>> {
        self.commands
            .read()
            .expect("command registry poisoned")
            .get(name)
            .cloned()
    }

    /// Remove a handler; false when the name is not registered
    pub fn remove_command(&self, name: &str) -> bool {
        self.commands
            .write()
            .expect("command registry poisoned")
            .remove(name)
            .is_some()
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// Schema validation has run before execute(), so these never fail on a
// dispatched request; the fallbacks only matter for direct callers.
fn param_i64(params: &Map<String, Value>, name: &str) -> i64 {
    params.get(name).and_then(Value::as_i64).unwrap_or(-1)
}

fn param_str<'a>(params: &'a Map<String, Value>, name: &str) -> &'a str {
    params.get(name).and_then(Value::as_str).unwrap_or("")
}

// =============================================================================
// Account commands
// =============================================================================

struct RegisterCommand;

impl Command for RegisterCommand {
    fn params(&self) -> &'static [(&'static str, ParamKind)] {
        &[("password", ParamKind::String)]
    }

    fn command_type(&self) -> u32 {
        NORMAL_TYPE
    }

    fn execute(
        &self,
        manager: &Manager,
        _executor: UserId,
        params: &Map<String, Value>,
    ) -> Result<Value> {
        let user = manager.add_new_user();
        user.first_set_password(param_str(params, "password"))?;
        Ok(with_field(
            make_success_message("Successfully registered!"),
            "user_id",
            json!(user.id()),
        ))
    }
}

struct HasUserCommand;

impl Command for HasUserCommand {
    fn params(&self) -> &'static [(&'static str, ParamKind)] {
        &[("user_id", ParamKind::Int)]
    }

    fn command_type(&self) -> u32 {
        NORMAL_TYPE
    }

    fn execute(
        &self,
        manager: &Manager,
        _executor: UserId,
        params: &Map<String, Value>,
    ) -> Result<Value> {
        let target = UserId(param_i64(params, "user_id"));
        Ok(with_field(
            make_success_message("Successfully getting result!"),
            "result",
            json!(manager.has_user(target)),
        ))
    }
}

struct SearchUserCommand;

impl Command for SearchUserCommand {
    fn params(&self) -> &'static [(&'static str, ParamKind)] {
        &[("user_name", ParamKind::String)]
    }

    fn command_type(&self) -> u32 {
        NORMAL_TYPE
    }

    fn execute(
        &self,
        _manager: &Manager,
        _executor: UserId,
        _params: &Map<String, Value>,
    ) -> Result<Value> {
        Ok(make_error_message("This function is incomplete."))
    }
}

// =============================================================================
// Friend commands
// =============================================================================

struct AddFriendCommand;

impl Command for AddFriendCommand {
    fn params(&self) -> &'static [(&'static str, ParamKind)] {
        &[("user_id", ParamKind::Int)]
    }

    fn execute(
        &self,
        manager: &Manager,
        executor: UserId,
        params: &Map<String, Value>,
    ) -> Result<Value> {
        let target = UserId(param_i64(params, "user_id"));
        manager
            .verifications()
            .apply_friend_verification(manager, executor, target)?;
        Ok(make_success_message("Successfully sent a friend application!"))
    }
}

struct GetFriendListCommand;

impl Command for GetFriendListCommand {
    fn params(&self) -> &'static [(&'static str, ParamKind)] {
        &[]
    }

    fn execute(
        &self,
        manager: &Manager,
        executor: UserId,
        _params: &Map<String, Value>,
    ) -> Result<Value> {
        let user = manager.get_user(executor)?;
        Ok(with_field(
            make_success_message("Successfully getting friend list!"),
            "friend_list",
            json!(user.friend_list()),
        ))
    }
}

struct SendFriendMessageCommand;

impl Command for SendFriendMessageCommand {
    fn params(&self) -> &'static [(&'static str, ParamKind)] {
        &[("user_id", ParamKind::Int), ("message", ParamKind::String)]
    }

    fn execute(
        &self,
        manager: &Manager,
        executor: UserId,
        params: &Map<String, Value>,
    ) -> Result<Value> {
        let target = UserId(param_i64(params, "user_id"));
        let room_id = manager.get_private_room_id(executor, target)?;
        let room = manager.get_private_room(room_id)?;
        room.send_message(manager, executor, param_str(params, "message"))?;
        Ok(make_success_message("Successfully sent a message!"))
    }
}

struct AcceptFriendVerificationCommand;

impl Command for AcceptFriendVerificationCommand {
    fn params(&self) -> &'static [(&'static str, ParamKind)] {
        &[("user_id", ParamKind::Int)]
    }

    fn execute(
        &self,
        manager: &Manager,
        executor: UserId,
        params: &Map<String, Value>,
    ) -> Result<Value> {
        let applicant = UserId(param_i64(params, "user_id"));
        manager
            .verifications()
            .accept_friend_verification(manager, applicant, executor)?;
        Ok(make_success_message(
            "Successfully accepted a friend verification!",
        ))
    }
}

struct RejectFriendVerificationCommand;

impl Command for RejectFriendVerificationCommand {
    fn params(&self) -> &'static [(&'static str, ParamKind)] {
        &[("user_id", ParamKind::Int)]
    }

    fn execute(
        &self,
        manager: &Manager,
        executor: UserId,
        params: &Map<String, Value>,
    ) -> Result<Value> {
        let applicant = UserId(param_i64(params, "user_id"));
        manager
            .verifications()
            .reject_friend_verification(manager, applicant, executor)?;
        Ok(make_success_message(
            "Successfully rejected a friend verification!",
        ))
    }
}

struct GetFriendVerificationListCommand;

impl Command for GetFriendVerificationListCommand {
    fn params(&self) -> &'static [(&'static str, ParamKind)] {
        &[]
    }

    fn execute(
        &self,
        manager: &Manager,
        executor: UserId,
        _params: &Map<String, Value>,
    ) -> Result<Value> {
        let user = manager.get_user(executor)?;
        let list = serde_json::to_value(user.friend_verification_list())?;
        Ok(with_field(
            make_success_message("Successfully getting friend verification list!"),
            "result",
            list,
        ))
    }
}

struct RemoveFriendCommand;

impl Command for RemoveFriendCommand {
    fn params(&self) -> &'static [(&'static str, ParamKind)] {
        &[("user_id", ParamKind::Int)]
    }

    fn execute(
        &self,
        manager: &Manager,
        executor: UserId,
        params: &Map<String, Value>,
    ) -> Result<Value> {
        let target = UserId(param_i64(params, "user_id"));
        let room_id = manager.get_private_room_id(executor, target)?;
        let room = manager.get_private_room(room_id)?;
        room.remove_this_room();
        manager.remove_private_room(room_id)?;

        manager.get_user(executor)?.update_friend_list(|set| {
            set.remove(&target);
        });
        manager.get_user(target)?.update_friend_list(|set| {
            set.remove(&executor);
        });
        Ok(make_success_message("Successfully removed a friend!"))
    }
}

// =============================================================================
// Group commands
// =============================================================================

struct AddGroupCommand;

impl Command for AddGroupCommand {
    fn params(&self) -> &'static [(&'static str, ParamKind)] {
        &[("group_id", ParamKind::Int)]
    }

    fn execute(
        &self,
        manager: &Manager,
        executor: UserId,
        params: &Map<String, Value>,
    ) -> Result<Value> {
        let group = GroupId(param_i64(params, "group_id"));
        manager
            .verifications()
            .apply_group_verification(manager, executor, group)?;
        Ok(make_success_message("Successfully sent a group application!"))
    }
}

struct GetGroupListCommand;

impl Command for GetGroupListCommand {
    fn params(&self) -> &'static [(&'static str, ParamKind)] {
        &[]
    }

    fn execute(
        &self,
        manager: &Manager,
        executor: UserId,
        _params: &Map<String, Value>,
    ) -> Result<Value> {
        let user = manager.get_user(executor)?;
        Ok(with_field(
            make_success_message("Successfully getting group list!"),
            "group_list",
            json!(user.group_list()),
        ))
    }
}

struct SendGroupMessageCommand;

impl Command for SendGroupMessageCommand {
    fn params(&self) -> &'static [(&'static str, ParamKind)] {
        &[("group_id", ParamKind::Int), ("message", ParamKind::String)]
    }

    fn execute(
        &self,
        manager: &Manager,
        executor: UserId,
        params: &Map<String, Value>,
    ) -> Result<Value> {
        let group = GroupId(param_i64(params, "group_id"));
        let room = manager.get_group_room(group)?;
        if !room.has_member(executor) {
            return Err(ChatError::NoPermission);
        }
        room.send_message(manager, executor, param_str(params, "message"))?;
        Ok(make_success_message("Successfully sent a message!"))
    }
}

struct AcceptGroupVerificationCommand;

impl Command for AcceptGroupVerificationCommand {
    fn params(&self) -> &'static [(&'static str, ParamKind)] {
        &[("group_id", ParamKind::Int), ("user_id", ParamKind::Int)]
    }

    fn execute(
        &self,
        manager: &Manager,
        executor: UserId,
        params: &Map<String, Value>,
    ) -> Result<Value> {
        let group = GroupId(param_i64(params, "group_id"));
        let applicant = UserId(param_i64(params, "user_id"));
        if manager.get_group_room(group)?.administrator() != executor {
            return Err(ChatError::NoPermission);
        }
        manager
            .verifications()
            .accept_group_verification(manager, applicant, group)?;
        Ok(make_success_message(
            "Successfully accepted a group verification!",
        ))
    }
}

struct RejectGroupVerificationCommand;

impl Command for RejectGroupVerificationCommand {
    fn params(&self) -> &'static [(&'static str, ParamKind)] {
        &[("group_id", ParamKind::Int), ("user_id", ParamKind::Int)]
    }

    fn execute(
        &self,
        manager: &Manager,
        executor: UserId,
        params: &Map<String, Value>,
    ) -> Result<Value> {
        let group = GroupId(param_i64(params, "group_id"));
        let applicant = UserId(param_i64(params, "user_id"));
        if manager.get_group_room(group)?.administrator() != executor {
            return Err(ChatError::NoPermission);
        }
        manager
            .verifications()
            .reject_group_verification(manager, applicant, group)?;
        Ok(make_success_message(
            "Successfully rejected a group verification!",
        ))
    }
}

struct GetGroupVerificationListCommand;

impl Command for GetGroupVerificationListCommand {
    fn params(&self) -> &'static [(&'static str, ParamKind)] {
        &[]
    }

    fn execute(
        &self,
        manager: &Manager,
        executor: UserId,
        _params: &Map<String, Value>,
    ) -> Result<Value> {
        let user = manager.get_user(executor)?;
        let list = serde_json::to_value(user.group_verification_list())?;
        Ok(with_field(
            make_success_message("Successfully getting group verification list!"),
            "result",
            list,
        ))
    }
}

struct CreateGroupCommand;

impl Command for CreateGroupCommand {
    fn params(&self) -> &'static [(&'static str, ParamKind)] {
        &[]
    }

    fn execute(
        &self,
        manager: &Manager,
        executor: UserId,
        _params: &Map<String, Value>,
    ) -> Result<Value> {
        let user = manager.get_user(executor)?;
        let group = manager.add_group_room(executor);
        user.update_group_list(|set| {
            set.insert(group);
        });
        Ok(with_field(
            make_success_message("Successfully created a group!"),
            "group_id",
            json!(group),
        ))
    }
}

struct RemoveGroupCommand;

impl Command for RemoveGroupCommand {
    fn params(&self) -> &'static [(&'static str, ParamKind)] {
        &[("group_id", ParamKind::Int)]
    }

    fn execute(
        &self,
        manager: &Manager,
        executor: UserId,
        params: &Map<String, Value>,
    ) -> Result<Value> {
        let group = GroupId(param_i64(params, "group_id"));
        let room = manager.get_group_room(group)?;
        if room.administrator() != executor {
            return Err(ChatError::NoPermission);
        }

        room.remove_this_room();
        for member in room.member_ids() {
            if let Ok(user) = manager.get_user(member) {
                user.update_group_list(|set| {
                    set.remove(&group);
                });
            }
        }
        manager.remove_group_room(group)?;
        Ok(make_success_message("Successfully removed the group!"))
    }
}

struct LeaveGroupCommand;

impl Command for LeaveGroupCommand {
    fn params(&self) -> &'static [(&'static str, ParamKind)] {
        &[("group_id", ParamKind::Int)]
    }

    fn execute(
        &self,
        manager: &Manager,
        executor: UserId,
        params: &Map<String, Value>,
    ) -> Result<Value> {
        let group = GroupId(param_i64(params, "group_id"));
        let room = manager.get_group_room(group)?;
        if room.administrator() == executor {
            return Err(ChatError::NoPermission);
        }
        if !room.remove_member(executor) {
            return Err(ChatError::NoPermission);
        }
        manager.get_user(executor)?.update_group_list(|set| {
            set.remove(&group);
        });
        Ok(make_success_message("Successfully left the group!"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopCommand;

    impl Command for NoopCommand {
        fn params(&self) -> &'static [(&'static str, ParamKind)] {
            &[]
        }

        fn execute(
            &self,
            _manager: &Manager,
            _executor: UserId,
            _params: &Map<String, Value>,
        ) -> Result<Value> {
            Ok(make_success_message("noop"))
        }
    }

    #[test]
    fn test_registry_carries_the_full_vocabulary() {
        let registry = CommandRegistry::new();
        for name in [
            "register",
            "has_user",
            "search_user",
            "add_friend",
            "add_group",
            "get_friend_list",
            "get_group_list",
            "send_friend_message",
            "send_group_message",
            "accept_friend_verification",
            "reject_friend_verification",
            "get_friend_verification_list",
            "accept_group_verification",
            "reject_group_verification",
            "get_group_verification_list",
            "create_group",
            "remove_group",
            "leave_group",
            "remove_friend",
        ] {
            assert!(registry.has_command(name), "missing command {}", name);
        }
        assert!(!registry.has_command("login"));
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let registry = CommandRegistry::new();
        assert!(!registry.add_command("register", Arc::new(NoopCommand)));
        assert!(registry.add_command("noop", Arc::new(NoopCommand)));
        assert!(!registry.add_command("noop", Arc::new(NoopCommand)));
        assert!(registry.remove_command("noop"));
        assert!(!registry.remove_command("noop"));
    }

    #[test]
    fn test_pre_login_capability_bits() {
        let registry = CommandRegistry::new();
        for name in ["register", "has_user", "search_user"] {
            let command = registry.get_command(name).unwrap();
            assert_ne!(command.command_type() & NORMAL_TYPE, 0, "{}", name);
        }
        for name in ["get_friend_list", "send_friend_message", "create_group"] {
            let command = registry.get_command(name).unwrap();
            assert_eq!(command.command_type() & NORMAL_TYPE, 0, "{}", name);
        }
    }

    #[tokio::test]
    async fn test_register_and_has_user() {
        let manager = Manager::new();
        let registry = CommandRegistry::new();

        let mut params = Map::new();
        params.insert("password".to_string(), json!("secret"));
        let reply = registry
            .get_command("register")
            .unwrap()
            .execute(&manager, UserId::UNBOUND, &params)
            .unwrap();
        assert_eq!(reply["state"], "success");
        let user_id = UserId(reply["user_id"].as_i64().unwrap());
        assert!(manager.has_user(user_id));
        assert!(manager.get_user(user_id).unwrap().is_user_password("secret"));

        let mut params = Map::new();
        params.insert("user_id".to_string(), json!(user_id.0));
        let reply = registry
            .get_command("has_user")
            .unwrap()
            .execute(&manager, UserId::UNBOUND, &params)
            .unwrap();
        assert_eq!(reply["result"], true);
    }

    #[tokio::test]
    async fn test_friend_flow_through_commands() {
        let manager = Manager::new();
        let registry = CommandRegistry::new();
        let a = manager.add_new_user().id();
        let b = manager.add_new_user().id();

        let mut params = Map::new();
        params.insert("user_id".to_string(), json!(b.0));
        registry
            .get_command("add_friend")
            .unwrap()
            .execute(&manager, a, &params)
            .unwrap();

        // b accepts a's application
        let mut params = Map::new();
        params.insert("user_id".to_string(), json!(a.0));
        registry
            .get_command("accept_friend_verification")
            .unwrap()
            .execute(&manager, b, &params)
            .unwrap();

        let reply = registry
            .get_command("get_friend_list")
            .unwrap()
            .execute(&manager, a, &Map::new())
            .unwrap();
        assert_eq!(reply["friend_list"], json!([b.0]));

        // a removes the friendship again
        let mut params = Map::new();
        params.insert("user_id".to_string(), json!(b.0));
        registry
            .get_command("remove_friend")
            .unwrap()
            .execute(&manager, a, &params)
            .unwrap();
        assert!(!manager.has_private_room(a, b));
        assert!(!manager.get_user(b).unwrap().has_friend(a));
    }

    #[tokio::test]
    async fn test_group_flow_through_commands() {
        let manager = Manager::new();
        let registry = CommandRegistry::new();
        let admin = manager.add_new_user().id();
        let member = manager.add_new_user().id();

        let reply = registry
            .get_command("create_group")
            .unwrap()
            .execute(&manager, admin, &Map::new())
            .unwrap();
        let group = GroupId(reply["group_id"].as_i64().unwrap());
        assert!(manager.get_user(admin).unwrap().has_group(group));

        let mut params = Map::new();
        params.insert("group_id".to_string(), json!(group.0));
        registry
            .get_command("add_group")
            .unwrap()
            .execute(&manager, member, &params)
            .unwrap();

        // only the administrator may resolve the application
        let mut accept = Map::new();
        accept.insert("group_id".to_string(), json!(group.0));
        accept.insert("user_id".to_string(), json!(member.0));
        assert_eq!(
            registry
                .get_command("accept_group_verification")
                .unwrap()
                .execute(&manager, member, &accept)
                .unwrap_err(),
            ChatError::NoPermission
        );
        registry
            .get_command("accept_group_verification")
            .unwrap()
            .execute(&manager, admin, &accept)
            .unwrap();
        assert!(manager.get_group_room(group).unwrap().has_member(member));

        // the administrator cannot leave, members can
        let mut params = Map::new();
        params.insert("group_id".to_string(), json!(group.0));
        assert_eq!(
            registry
                .get_command("leave_group")
                .unwrap()
                .execute(&manager, admin, &params)
                .unwrap_err(),
            ChatError::NoPermission
        );
        registry
            .get_command("leave_group")
            .unwrap()
            .execute(&manager, member, &params)
            .unwrap();
        assert!(!manager.get_group_room(group).unwrap().has_member(member));

        // removal clears every member's group set
        registry
            .get_command("remove_group")
            .unwrap()
            .execute(&manager, admin, &params)
            .unwrap();
        assert!(!manager.has_group_room(group));
        assert!(!manager.get_user(admin).unwrap().has_group(group));
    }

    #[tokio::test]
    async fn test_send_group_message_requires_membership() {
        let manager = Manager::new();
        let registry = CommandRegistry::new();
        let admin = manager.add_new_user().id();
        let outsider = manager.add_new_user().id();
        let group = manager.add_group_room(admin);

        let mut params = Map::new();
        params.insert("group_id".to_string(), json!(group.0));
        params.insert("message".to_string(), json!("hello"));
        assert_eq!(
            registry
                .get_command("send_group_message")
                .unwrap()
                .execute(&manager, outsider, &params)
                .unwrap_err(),
            ChatError::NoPermission
        );

        registry
            .get_command("send_group_message")
            .unwrap()
            .execute(&manager, admin, &params)
            .unwrap();
        assert_eq!(manager.get_group_room(group).unwrap().message_count(), 1);
    }

    #[tokio::test]
    async fn test_search_user_is_incomplete() {
        let manager = Manager::new();
        let registry = CommandRegistry::new();
        let mut params = Map::new();
        params.insert("user_name".to_string(), json!("alice"));
        let reply = registry
            .get_command("search_user")
            .unwrap()
            .execute(&manager, UserId::UNBOUND, &params)
            .unwrap();
        assert_eq!(reply["state"], "error");
        assert_eq!(reply["message"], "This function is incomplete.");
    }
}
