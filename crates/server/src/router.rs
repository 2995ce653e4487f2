//! Command dispatch.
//!
//! The router turns each inbound request into engine calls and queues the
//! response on the session's outbound channel. Handler errors become error
//! responses carrying the request id; the connection always survives them.
//! Only framing-level errors, which never reach the router, close a
//! connection.

use colonnade_engine::{DeleteCallback, Engine, UpdateCallback, UpdateMode};
use colonnade_protocol::{Command, EngineValue, Message};
use std::sync::Arc;
use tracing::{debug, info};

use crate::callbacks::{CallbackKind, CallbackRegistration, CallbackRegistry};
use crate::error::{Error, Result};
use crate::methods::{MethodArgs, TableMethod, ViewMethod};
use crate::registry::Registry;
use crate::session::Session;

/// Dispatches requests from any number of sessions against one engine.
pub struct Router {
    engine: Arc<dyn Engine>,
    registry: Arc<Registry>,
    callbacks: Arc<CallbackRegistry>,
    heartbeat_interval_ms: i64,
}

impl Router {
    /// Create a router over the given engine.
    pub fn new(engine: Arc<dyn Engine>, heartbeat_interval_ms: i64) -> Self {
        Self {
            engine,
            registry: Arc::new(Registry::new()),
            callbacks: Arc::new(CallbackRegistry::new()),
            heartbeat_interval_ms,
        }
    }

    /// The shared table/view registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The shared subscription registry.
    #[must_use]
    pub fn callbacks(&self) -> &Arc<CallbackRegistry> {
        &self.callbacks
    }

    /// Reject mutating commands until [`Router::unlock`].
    pub fn lock(&self) {
        self.registry.lock();
    }

    /// Allow mutating commands again.
    pub fn unlock(&self) {
        self.registry.unlock();
    }

    /// Host-side table registration, for tables the server process owns.
    ///
    /// # Errors
    ///
    /// Fails if the name is already registered.
    pub fn host_table(
        &self,
        name: &str,
        table: Arc<dyn colonnade_engine::Table>,
    ) -> Result<()> {
        self.registry.insert_table(name, table)
    }

    /// Host-side table removal. Detaches every subscription attached to
    /// the table and destroys it.
    pub fn drop_table(&self, name: &str) {
        if let Some(table) = self.registry.remove_table(name) {
            for registration in self.callbacks.remove_by_target(name) {
                table.remove_delete(registration.token);
            }
            table.delete();
        }
    }

    /// Handle one request, queuing any response on the session.
    pub fn handle(&self, message: Message, session: &Arc<Session>) {
        let id = message.id;
        match self.dispatch(message, session) {
            Ok(Some(response)) => session.send_response(response),
            Ok(None) => {}
            Err(e) => {
                debug!(session_id = %session.id(), request_id = id, error = %e, "request failed");
                session.send_response(Message::error_response(id, e.to_wire()));
            }
        }
    }

    fn dispatch(&self, message: Message, session: &Arc<Session>) -> Result<Option<Message>> {
        let cmd = message.cmd.ok_or_else(|| {
            Error::InvalidRequest("message carries no command".to_string())
        })?;
        match cmd {
            Command::Init => Ok(Some(Message::response(message.id, self.capabilities()))),
            Command::CreateTable => self.create_table(message).map(Some),
            Command::CreateView => self.create_view(message, session).map(Some),
            Command::CallTableMethod => self.call_table_method(message, session),
            Command::CallViewMethod => self.call_view_method(message, session),
        }
    }

    fn capabilities(&self) -> EngineValue {
        EngineValue::mapping([
            ("version", EngineValue::from(env!("CARGO_PKG_VERSION"))),
            (
                "heartbeat_interval_ms",
                EngineValue::Int(self.heartbeat_interval_ms),
            ),
        ])
    }

    fn create_table(&self, message: Message) -> Result<Message> {
        if self.registry.is_locked() {
            return Err(Error::AccessDenied);
        }
        let name = required_target(&message)?;
        let mut args = message.args.into_iter();
        let data_or_schema = args.next().unwrap_or(EngineValue::Null);
        let options = match args.next() {
            None | Some(EngineValue::Null) => EngineValue::empty_mapping(),
            Some(options) => options,
        };

        let table = self.engine.table(data_or_schema, options)?;
        self.registry.insert_table(&name, table)?;
        info!(table = %name, "table created");
        Ok(Message::response(message.id, EngineValue::Str(name)))
    }

    fn create_view(&self, message: Message, session: &Arc<Session>) -> Result<Message> {
        let table_name = required_target(&message)?;
        let table = self.registry.table(&table_name)?;

        let mut args = message.args.into_iter();
        let config = match args.next() {
            None | Some(EngineValue::Null) => EngineValue::empty_mapping(),
            Some(config) => config,
        };
        let view_name = match args.next() {
            Some(EngineValue::Str(name)) => name,
            _ => self.registry.generate_view_name(),
        };

        let view = table.view(config)?;
        self.registry.insert_view(&view_name, view)?;
        session.track_view(&view_name);
        debug!(table = %table_name, view = %view_name, "view created");
        Ok(Message::response(message.id, EngineValue::Str(view_name)))
    }

    fn call_table_method(
        &self,
        message: Message,
        session: &Arc<Session>,
    ) -> Result<Option<Message>> {
        let target = required_target(&message)?;
        let method = TableMethod::from_name(required_method(&message)?)?;
        if method.is_mutating() && self.registry.is_locked() {
            return Err(Error::AccessDenied);
        }
        if method == TableMethod::Delete {
            return Err(Error::Forbidden(
                "tables may not be deleted remotely".to_string(),
            ));
        }
        let table = self.registry.table(&target)?;

        match method {
            TableMethod::OnDelete => {
                let registration = self.subscription_params(&message)?;
                let push = self.delete_push(session, registration.0, registration.1);
                let token = table.on_delete(push);
                self.register_subscription(
                    session,
                    registration.0,
                    registration.1,
                    &target,
                    CallbackKind::Delete,
                    token,
                );
                return Ok(None);
            }
            TableMethod::RemoveDelete => {
                let callback_id = required_callback_id(&message)?;
                if let Some(reg) = self.callbacks.remove(session.id(), callback_id) {
                    table.remove_delete(reg.token);
                }
                return Ok(Some(Message::response(message.id, EngineValue::Null)));
            }
            _ => {}
        }

        let id = message.id;
        let data = match (method, method.shape_args(message.args)?) {
            (TableMethod::Schema, _) => table.schema()?,
            (TableMethod::Size, _) => EngineValue::Int(table.size()?),
            (TableMethod::Update, MethodArgs::Mutate { payload, port_id }) => {
                table.update(payload, port_id)?;
                EngineValue::Null
            }
            (TableMethod::Remove, MethodArgs::Mutate { payload, port_id }) => {
                table.remove(payload, port_id)?;
                EngineValue::Null
            }
            (TableMethod::Replace, MethodArgs::Positional(mut args)) => {
                if args.is_empty() {
                    return Err(Error::InvalidRequest(
                        "replace requires a data argument".to_string(),
                    ));
                }
                table.replace(args.remove(0))?;
                EngineValue::Null
            }
            (TableMethod::Clear, _) => {
                table.clear()?;
                EngineValue::Null
            }
            (TableMethod::MakePort, _) => EngineValue::Int(table.make_port()?),
            (other, args) => {
                return Err(Error::InvalidRequest(format!(
                    "arguments {args:?} do not fit table method {other:?}"
                )));
            }
        };
        Ok(Some(Message::response(id, data)))
    }

    fn call_view_method(
        &self,
        message: Message,
        session: &Arc<Session>,
    ) -> Result<Option<Message>> {
        let target = required_target(&message)?;
        let method = ViewMethod::from_name(required_method(&message)?)?;
        let view = self.registry.view(&target)?;

        match method {
            ViewMethod::OnUpdate => {
                let (request_id, callback_id) = self.subscription_params(&message)?;
                let mode = update_mode(message.args.first());
                let push = self.update_push(session, request_id, callback_id);
                let token = view.on_update(push, mode);
                self.register_subscription(
                    session,
                    request_id,
                    callback_id,
                    &target,
                    CallbackKind::Update,
                    token,
                );
                return Ok(None);
            }
            ViewMethod::OnDelete => {
                let (request_id, callback_id) = self.subscription_params(&message)?;
                let push = self.delete_push(session, request_id, callback_id);
                let token = view.on_delete(push);
                self.register_subscription(
                    session,
                    request_id,
                    callback_id,
                    &target,
                    CallbackKind::Delete,
                    token,
                );
                return Ok(None);
            }
            ViewMethod::RemoveUpdate => {
                let callback_id = required_callback_id(&message)?;
                if let Some(reg) = self.callbacks.remove(session.id(), callback_id) {
                    view.remove_update(reg.token);
                }
                return Ok(Some(Message::response(message.id, EngineValue::Null)));
            }
            ViewMethod::RemoveDelete => {
                let callback_id = required_callback_id(&message)?;
                if let Some(reg) = self.callbacks.remove(session.id(), callback_id) {
                    view.remove_delete(reg.token);
                }
                return Ok(Some(Message::response(message.id, EngineValue::Null)));
            }
            ViewMethod::Delete => {
                // Deletion also drops the registry entry, so a view's name
                // is free for reuse as soon as its delete resolves.
                self.registry.remove_view(&target);
                for reg in self.callbacks.remove_by_target(&target) {
                    match reg.kind {
                        CallbackKind::Update => view.remove_update(reg.token),
                        CallbackKind::Delete => view.remove_delete(reg.token),
                    }
                }
                session.untrack_view(&target);
                view.delete();
                debug!(view = %target, "view deleted");
                return Ok(Some(Message::response(message.id, EngineValue::Null)));
            }
            _ => {}
        }

        let id = message.id;
        let data = match (method, method.shape_args(message.args)?) {
            (ViewMethod::Schema, _) => view.schema()?,
            (ViewMethod::Dimensions, _) => view.dimensions()?,
            (ViewMethod::ToColumns, MethodArgs::Serialize { options }) => {
                view.to_columns(options)?
            }
            (ViewMethod::ToRows, MethodArgs::Serialize { options }) => view.to_rows(options)?,
            (ViewMethod::ToArrow, MethodArgs::Serialize { options }) => {
                EngineValue::Binary(view.to_arrow(options)?)
            }
            (other, args) => {
                return Err(Error::InvalidRequest(format!(
                    "arguments {args:?} do not fit view method {other:?}"
                )));
            }
        };
        Ok(Some(Message::response(id, data)))
    }

    fn subscription_params(&self, message: &Message) -> Result<(i64, u32)> {
        if !message.subscribe {
            return Err(Error::InvalidRequest(
                "subscription method requires subscribe flag".to_string(),
            ));
        }
        Ok((message.id, required_callback_id(message)?))
    }

    fn register_subscription(
        &self,
        session: &Arc<Session>,
        request_id: i64,
        callback_id: u32,
        target: &str,
        kind: CallbackKind,
        token: colonnade_engine::SubToken,
    ) {
        self.callbacks.insert(CallbackRegistration {
            callback_id,
            session_id: session.id(),
            target_name: target.to_string(),
            request_id,
            kind,
            token,
        });
        debug!(session_id = %session.id(), callback_id, target, "subscription registered");
    }

    /// Bridging closure for view update notifications. Each firing
    /// re-enters the session's outbound channel as a push that reuses the
    /// subscribing request's id; the delta travels as the binary payload
    /// of the push.
    fn update_push(
        &self,
        session: &Arc<Session>,
        request_id: i64,
        callback_id: u32,
    ) -> UpdateCallback {
        let session = Arc::clone(session);
        Arc::new(move |event| {
            let mut data = EngineValue::mapping([("port_id", EngineValue::Int(event.port_id))]);
            if let Some(delta) = event.delta {
                if let EngineValue::Mapping(map) = &mut data {
                    map.insert("delta".to_string(), EngineValue::Binary(delta));
                }
            }
            session.send_push(Message::push(request_id, callback_id, data));
        })
    }

    fn delete_push(
        &self,
        session: &Arc<Session>,
        request_id: i64,
        callback_id: u32,
    ) -> DeleteCallback {
        let session = Arc::clone(session);
        Arc::new(move || {
            session.send_push(Message::push(request_id, callback_id, EngineValue::Null));
        })
    }

    /// Tear down everything a disconnected session owned.
    ///
    /// Idempotent: targets already gone are skipped, and callback ids
    /// already removed resolve to nothing.
    pub fn close_session(&self, session: &Arc<Session>) {
        for reg in self.callbacks.remove_by_session(session.id()) {
            self.detach(&reg);
        }
        for view_name in session.owned_views() {
            if let Some(view) = self.registry.remove_view(&view_name) {
                for reg in self.callbacks.remove_by_target(&view_name) {
                    match reg.kind {
                        CallbackKind::Update => view.remove_update(reg.token),
                        CallbackKind::Delete => view.remove_delete(reg.token),
                    }
                }
                view.delete();
            }
        }
        info!(session_id = %session.id(), "session closed");
    }

    fn detach(&self, reg: &CallbackRegistration) {
        match self.registry.target(&reg.target_name) {
            Ok(crate::registry::Target::Table(table)) => table.remove_delete(reg.token),
            Ok(crate::registry::Target::View(view)) => match reg.kind {
                CallbackKind::Update => view.remove_update(reg.token),
                CallbackKind::Delete => view.remove_delete(reg.token),
            },
            // The target was deleted; its callbacks died with it.
            Err(_) => {}
        }
    }
}

fn required_target(message: &Message) -> Result<String> {
    message
        .target_name
        .clone()
        .ok_or_else(|| Error::InvalidRequest("message carries no target_name".to_string()))
}

fn required_method(message: &Message) -> Result<&str> {
    message
        .method
        .as_deref()
        .ok_or_else(|| Error::InvalidRequest("message carries no method".to_string()))
}

fn required_callback_id(message: &Message) -> Result<u32> {
    message
        .callback_id
        .ok_or_else(|| Error::InvalidRequest("message carries no callback_id".to_string()))
}

fn update_mode(options: Option<&EngineValue>) -> UpdateMode {
    let wants_delta = options
        .and_then(|opts| opts.get("mode"))
        .and_then(EngineValue::as_str)
        .map(|mode| mode == "delta")
        .unwrap_or(false);
    if wants_delta {
        UpdateMode::Delta
    } else {
        UpdateMode::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colonnade_engine_memory::MemoryEngine;
    use colonnade_transport::Frame;
    use tokio::sync::mpsc;

    fn router() -> Router {
        Router::new(Arc::new(MemoryEngine::new()), 15_000)
    }

    fn session() -> (Arc<Session>, mpsc::UnboundedReceiver<Vec<Frame>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Session::new(tx, 16 * 1024 * 1024)), rx)
    }

    fn next_message(rx: &mut mpsc::UnboundedReceiver<Vec<Frame>>) -> Message {
        let frames = rx.try_recv().expect("expected a queued message");
        match &frames[0] {
            Frame::Text(text) => serde_json::from_str(text).unwrap(),
            Frame::Binary(_) => panic!("expected text frame first"),
        }
    }

    fn schema_value() -> EngineValue {
        EngineValue::mapping([
            ("price", EngineValue::from("float")),
            ("symbol", EngineValue::from("string")),
        ])
    }

    fn create_table(router: &Router, session: &Arc<Session>, rx: &mut mpsc::UnboundedReceiver<Vec<Frame>>, name: &str) {
        router.handle(
            Message::create_table(1, name, schema_value(), EngineValue::empty_mapping()),
            session,
        );
        let response = next_message(rx);
        assert_eq!(response.data, Some(EngineValue::Str(name.to_string())));
    }

    #[test]
    fn test_init_replies_with_capabilities() {
        let router = router();
        let (session, mut rx) = session();
        router.handle(Message::init(), &session);

        let response = next_message(&mut rx);
        assert_eq!(response.id, -1);
        let data = response.data.unwrap();
        assert_eq!(
            data.get("heartbeat_interval_ms"),
            Some(&EngineValue::Int(15_000))
        );
    }

    #[test]
    fn test_schema_echo_through_view() {
        let router = router();
        let (session, mut rx) = session();
        create_table(&router, &session, &mut rx, "quotes");

        router.handle(
            Message::create_view(2, "quotes", None, EngineValue::empty_mapping()),
            &session,
        );
        let view_name = match next_message(&mut rx).data.unwrap() {
            EngineValue::Str(name) => name,
            other => panic!("expected view name, got {other:?}"),
        };

        router.handle(Message::view_method(3, &view_name, "schema", vec![]), &session);
        assert_eq!(next_message(&mut rx).data, Some(schema_value()));
    }

    #[test]
    fn test_lock_rejects_mutations_but_not_reads() {
        let router = router();
        let (session, mut rx) = session();
        create_table(&router, &session, &mut rx, "quotes");

        router.lock();

        router.handle(
            Message::table_method(
                2,
                "quotes",
                "update",
                vec![EngineValue::mapping([(
                    "price",
                    EngineValue::Sequence(vec![EngineValue::Float(1.0)]),
                )])],
            ),
            &session,
        );
        let response = next_message(&mut rx);
        assert_eq!(response.error.unwrap().code, "AccessDenied");

        router.handle(Message::table_method(3, "quotes", "schema", vec![]), &session);
        assert!(next_message(&mut rx).error.is_none());

        router.handle(
            Message::create_table(4, "other", schema_value(), EngineValue::Null),
            &session,
        );
        assert_eq!(next_message(&mut rx).error.unwrap().code, "AccessDenied");

        router.unlock();
        router.handle(
            Message::create_table(5, "other", schema_value(), EngineValue::Null),
            &session,
        );
        assert!(next_message(&mut rx).error.is_none());
    }

    #[test]
    fn test_table_delete_forbidden_but_view_delete_permitted() {
        let router = router();
        let (session, mut rx) = session();
        create_table(&router, &session, &mut rx, "quotes");

        router.handle(Message::table_method(2, "quotes", "delete", vec![]), &session);
        assert_eq!(next_message(&mut rx).error.unwrap().code, "Forbidden");
        assert!(router.registry().has_table("quotes"));

        router.handle(
            Message::create_view(3, "quotes", Some("v".to_string()), EngineValue::Null),
            &session,
        );
        next_message(&mut rx);

        router.handle(Message::view_method(4, "v", "delete", vec![]), &session);
        assert!(next_message(&mut rx).error.is_none());
        assert!(!router.registry().has_view("v"));

        router.handle(Message::view_method(5, "v", "schema", vec![]), &session);
        assert_eq!(next_message(&mut rx).error.unwrap().code, "NotFound");
    }

    #[test]
    fn test_unknown_method_is_not_found() {
        let router = router();
        let (session, mut rx) = session();
        create_table(&router, &session, &mut rx, "quotes");

        router.handle(
            Message::table_method(2, "quotes", "__proto__", vec![]),
            &session,
        );
        assert_eq!(next_message(&mut rx).error.unwrap().code, "NotFound");
    }

    #[test]
    fn test_subscription_pushes_reuse_request_id() {
        let router = router();
        let (session, mut rx) = session();
        create_table(&router, &session, &mut rx, "quotes");
        router.handle(
            Message::create_view(2, "quotes", Some("v".to_string()), EngineValue::Null),
            &session,
        );
        next_message(&mut rx);

        router.handle(
            Message::view_method(42, "v", "on_update", vec![]).with_subscription(7),
            &session,
        );
        // Subscribing produces no immediate response.
        assert!(rx.try_recv().is_err());

        router.handle(
            Message::table_method(
                43,
                "quotes",
                "update",
                vec![EngineValue::mapping([(
                    "price",
                    EngineValue::Sequence(vec![EngineValue::Float(1.5)]),
                )])],
            ),
            &session,
        );

        // One update response and one push, in outbound order.
        let response = next_message(&mut rx);
        assert_eq!(response.id, 43);
        let push = next_message(&mut rx);
        assert_eq!(push.id, 42);
        assert_eq!(push.callback_id, Some(7));
        assert_eq!(
            push.data.unwrap().get("port_id"),
            Some(&EngineValue::Int(0))
        );
    }

    #[test]
    fn test_unsubscribe_stops_pushes() {
        let router = router();
        let (session, mut rx) = session();
        create_table(&router, &session, &mut rx, "quotes");
        router.handle(
            Message::create_view(2, "quotes", Some("v".to_string()), EngineValue::Null),
            &session,
        );
        next_message(&mut rx);

        router.handle(
            Message::view_method(3, "v", "on_update", vec![]).with_subscription(9),
            &session,
        );
        router.handle(
            Message::view_method(4, "v", "remove_update", vec![]).with_callback_id(9),
            &session,
        );
        let ack = next_message(&mut rx);
        assert_eq!(ack.data, Some(EngineValue::Null));
        assert!(router.callbacks().is_empty());

        router.handle(
            Message::table_method(
                5,
                "quotes",
                "update",
                vec![EngineValue::mapping([(
                    "price",
                    EngineValue::Sequence(vec![EngineValue::Float(2.0)]),
                )])],
            ),
            &session,
        );
        // Only the update's own response; no push.
        next_message(&mut rx);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_close_session_cleans_views_and_callbacks() {
        let router = router();
        let (session, mut rx) = session();
        let (other, mut other_rx) = self::session();
        create_table(&router, &session, &mut rx, "quotes");

        for (id, name) in [(2, "v1"), (3, "v2"), (4, "v3")] {
            router.handle(
                Message::create_view(id, "quotes", Some(name.to_string()), EngineValue::Null),
                &session,
            );
            next_message(&mut rx);
        }
        router.handle(
            Message::view_method(5, "v1", "on_update", vec![]).with_subscription(1),
            &session,
        );
        router.handle(
            Message::view_method(6, "v2", "on_delete", vec![]).with_subscription(2),
            &session,
        );

        // Another session subscribes against the same table's view.
        router.handle(
            Message::create_view(2, "quotes", Some("theirs".to_string()), EngineValue::Null),
            &other,
        );
        next_message(&mut other_rx);
        router.handle(
            Message::view_method(3, "theirs", "on_update", vec![]).with_subscription(1),
            &other,
        );

        router.close_session(&session);

        assert!(!router.registry().has_view("v1"));
        assert!(!router.registry().has_view("v2"));
        assert!(!router.registry().has_view("v3"));
        assert!(router.registry().has_table("quotes"));
        assert!(router.registry().has_view("theirs"));
        // The surviving session's subscription still fires.
        router.handle(
            Message::table_method(
                4,
                "quotes",
                "update",
                vec![EngineValue::mapping([(
                    "price",
                    EngineValue::Sequence(vec![EngineValue::Float(3.0)]),
                )])],
            ),
            &other,
        );
        next_message(&mut other_rx);
        assert_eq!(next_message(&mut other_rx).callback_id, Some(1));
    }

    #[test]
    fn test_keep_alive_many_pushes_one_registration() {
        let router = router();
        let (session, mut rx) = session();
        create_table(&router, &session, &mut rx, "quotes");
        router.handle(
            Message::create_view(2, "quotes", Some("v".to_string()), EngineValue::Null),
            &session,
        );
        next_message(&mut rx);
        router.handle(
            Message::view_method(3, "v", "on_update", vec![]).with_subscription(11),
            &session,
        );

        for i in 0..1000 {
            router.handle(
                Message::table_method(
                    10 + i,
                    "quotes",
                    "update",
                    vec![EngineValue::mapping([(
                        "price",
                        EngineValue::Sequence(vec![EngineValue::Float(f64::from(i as u32))]),
                    )])],
                ),
                &session,
            );
        }

        assert_eq!(router.callbacks().len(), 1);
        let mut pushes = 0;
        while let Ok(frames) = rx.try_recv() {
            let message: Message = match &frames[0] {
                Frame::Text(text) => serde_json::from_str(text).unwrap(),
                Frame::Binary(_) => continue,
            };
            if message.callback_id == Some(11) {
                pushes += 1;
            }
        }
        assert_eq!(pushes, 1000);
    }
}
