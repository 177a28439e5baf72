//! Per-connection dispatcher of the JSON command protocol
//!
//! The processor owns the connection's bound user id (initially the
//! unbound sentinel), validates the request envelope, enforces the login
//! gate, checks declared parameters and hands the request to its handler
//! on the worker pool. Whatever happens, the caller gets a JSON reply;
//! the connection itself is never closed from here.

use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::protocol::envelope::{make_error_message, make_handler_error, make_success_message};
use crate::protocol::frame::{DataPacket, PacketKind};
use crate::registry::manager::Manager;
use crate::registry::user::DeviceKind;
use crate::registry::UserId;
use crate::server::commands::{CommandRegistry, ParamKind, NORMAL_TYPE};
use crate::transport::connection::Connection;

/// Dispatcher for one connection
pub struct MessageProcessor {
    user_id: RwLock<UserId>,
    manager: Arc<Manager>,
    commands: Arc<CommandRegistry>,
    connection: Arc<Connection>,
}

impl MessageProcessor {
    pub fn new(
        manager: Arc<Manager>,
        commands: Arc<CommandRegistry>,
        connection: Arc<Connection>,
    ) -> Self {
        Self {
            user_id: RwLock::new(UserId::UNBOUND),
            manager,
            commands,
            connection,
        }
    }

    /// The user this connection is bound to, unbound before login
    pub fn local_user_id(&self) -> UserId {
        *self.user_id.read().expect("processor lock poisoned")
    }

    /// Process one inbound packet and produce the reply body
    pub async fn process_packet(&self, packet: &DataPacket) -> Value {
        if !self.local_user_id().is_bound() && packet.kind != PacketKind::Text {
            return make_error_message("You haven't logged in!");
        }

        match packet.kind {
            PacketKind::Text => {
                let json: Value = match serde_json::from_slice(&packet.payload) {
                    Ok(value) => value,
                    Err(_) => {
                        return make_error_message("The data body must be json dictory type!")
                    }
                };
                self.process_json_message(json).await
            }
            // File streams and binary payloads are not served yet
            _ => make_error_message("Error type"),
        }
    }

    async fn process_json_message(&self, json: Value) -> Value {
        debug!("Json body: {}", json);

        let Some(object) = json.as_object() else {
            return make_error_message("The data body must be json dictory type!");
        };
        if !object.contains_key("function") {
            return make_error_message("\"function\" must be included in json dictory!");
        }
        if !object.contains_key("parameters") {
            return make_error_message("\"parameters\" must be included in json dictory!");
        }
        let Some(function_name) = object["function"].as_str() else {
            return make_error_message("\"function\" must be string type!");
        };
        let Some(params) = object["parameters"].as_object() else {
            return make_error_message("\"parameters\" must be dictory type!");
        };

        // Login gate: an unbound connection may only run `login` and the
        // commands carrying the open capability bit.
        if !self.local_user_id().is_bound() && function_name != "login" {
            let open = self
                .commands
                .get_command(function_name)
                .map(|command| command.command_type() & NORMAL_TYPE != 0)
                .unwrap_or(false);
            if !open {
                return make_error_message("You haven't logged in!");
            }
        }

        if function_name == "login" {
            return self.login_from_params(params);
        }

        let Some(command) = self.commands.get_command(function_name) else {
            return make_error_message("There isn't a function that matches the name!");
        };

        for (name, kind) in command.params() {
            match params.get(*name) {
                None => return make_error_message(format!("Lost a parameter: {}.", name)),
                Some(value) if !kind.matches(value) => {
                    return make_error_message(format!("Wrong parameter type: {}.", name))
                }
                _ => {}
            }
        }

        // Post-to-executor hop: a slow handler must not starve this
        // connection's read path.
        let executor = self.local_user_id();
        let manager = Arc::clone(&self.manager);
        let params = params.clone();
        let handle =
            tokio::spawn(async move { command.execute(&manager, executor, &params) });

        match handle.await {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => make_handler_error(&err),
            Err(join_error) => {
                warn!("command task failed: {}", join_error);
                make_handler_error(&crate::error::ChatError::network(join_error.to_string()))
            }
        }
    }

    fn login_from_params(&self, params: &Map<String, Value>) -> Value {
        for (name, kind) in [
            ("user_id", ParamKind::Int),
            ("password", ParamKind::String),
            ("device", ParamKind::String),
        ] {
            match params.get(name) {
                None => return make_error_message(format!("Lost a parameter: {}.", name)),
                Some(value) if !kind.matches(value) => {
                    return make_error_message(format!("Wrong parameter type: {}.", name))
                }
                _ => {}
            }
        }

        let user_id = UserId(params["user_id"].as_i64().unwrap_or(-1));
        let password = params["password"].as_str().unwrap_or("");
        let device = params["device"].as_str().unwrap_or("");
        self.login(user_id, password, device)
    }

    /// Verify credentials and bind the connection to the user
    ///
    /// Unknown user and bad password answer identically.
    fn login(&self, user_id: UserId, password: &str, device: &str) -> Value {
        let Ok(user) = self.manager.get_user(user_id) else {
            return make_error_message("The user ID or password is wrong!");
        };
        if !user.is_user_password(password) {
            return make_error_message("The user ID or password is wrong!");
        }

        let device = DeviceKind::from_login_str(device);
        if let Err(err) =
            self.manager
                .modify_user_of_connection(self.connection.id(), user_id, device)
        {
            return make_handler_error(&err);
        }

        *self.user_id.write().expect("processor lock poisoned") = user_id;
        debug!("User {} logged into the server", user_id);
        make_success_message("Successfully logged in!")
    }
}
