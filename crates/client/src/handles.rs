//! Typed proxies for server-side tables and views.
//!
//! Handles hold no state beyond the target's name; every method is one
//! round trip. Dropping a handle releases nothing on the server: views
//! live until deleted explicitly or their session closes.

use bytes::Bytes;
use colonnade_protocol::{EngineValue, Message};
use tokio::sync::mpsc;

use crate::client::Client;
use crate::error::{Error, Result};

/// Delta mode requested when subscribing to view updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMode {
    /// Notify only.
    #[default]
    Notify,
    /// Attach the serialized row delta to each notification.
    Delta,
}

impl UpdateMode {
    fn to_options(self) -> EngineValue {
        match self {
            Self::Notify => EngineValue::empty_mapping(),
            Self::Delta => EngineValue::mapping([("mode", EngineValue::from("delta"))]),
        }
    }
}

/// A stream of push notifications for one subscription.
pub struct Subscription {
    request_id: i64,
    callback_id: u32,
    receiver: mpsc::UnboundedReceiver<EngineValue>,
}

impl Subscription {
    pub(crate) fn new(
        request_id: i64,
        callback_id: u32,
        receiver: mpsc::UnboundedReceiver<EngineValue>,
    ) -> Self {
        Self {
            request_id,
            callback_id,
            receiver,
        }
    }

    /// Await the next push, or `None` once the subscription has ended.
    pub async fn next(&mut self) -> Option<EngineValue> {
        self.receiver.recv().await
    }

    /// The subscription's callback correlation id.
    #[must_use]
    pub fn callback_id(&self) -> u32 {
        self.callback_id
    }

    pub(crate) fn request_id(&self) -> i64 {
        self.request_id
    }
}

/// Proxy for a server-side table.
#[derive(Clone)]
pub struct TableHandle {
    client: Client,
    name: String,
}

impl std::fmt::Debug for TableHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableHandle")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl TableHandle {
    pub(crate) fn new(client: Client, name: String) -> Self {
        Self { client, name }
    }

    /// The table's registered name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetch the table's column schema.
    pub async fn schema(&self) -> Result<EngineValue> {
        self.call("schema", vec![]).await
    }

    /// Fetch the table's row count.
    pub async fn size(&self) -> Result<i64> {
        match self.call("size", vec![]).await? {
            EngineValue::Int(n) => Ok(n),
            other => Err(Error::UnexpectedResponse(format!(
                "size is not an integer: {other:?}"
            ))),
        }
    }

    /// Apply an update payload through the given input port.
    pub async fn update(&self, data: EngineValue, port_id: i64) -> Result<()> {
        let options = EngineValue::mapping([("port_id", EngineValue::Int(port_id))]);
        self.call("update", vec![data, options]).await.map(|_| ())
    }

    /// Remove rows by key through the given input port.
    pub async fn remove(&self, keys: EngineValue, port_id: i64) -> Result<()> {
        let options = EngineValue::mapping([("port_id", EngineValue::Int(port_id))]);
        self.call("remove", vec![keys, options]).await.map(|_| ())
    }

    /// Replace the table's contents wholesale.
    pub async fn replace(&self, data: EngineValue) -> Result<()> {
        self.call("replace", vec![data]).await.map(|_| ())
    }

    /// Remove all rows.
    pub async fn clear(&self) -> Result<()> {
        self.call("clear", vec![]).await.map(|_| ())
    }

    /// Allocate a new input port id.
    pub async fn make_port(&self) -> Result<i64> {
        match self.call("make_port", vec![]).await? {
            EngineValue::Int(port) => Ok(port),
            other => Err(Error::UnexpectedResponse(format!(
                "make_port is not an integer: {other:?}"
            ))),
        }
    }

    /// Derive a view, optionally under a caller-chosen name.
    pub async fn view(
        &self,
        name: Option<String>,
        config: EngineValue,
    ) -> Result<ViewHandle> {
        let id = self.client.next_request_id();
        let data = self
            .client
            .request(Message::create_view(id, &self.name, name, config))
            .await?;
        match data {
            EngineValue::Str(name) => Ok(ViewHandle {
                client: self.client.clone(),
                name,
            }),
            other => Err(Error::UnexpectedResponse(format!(
                "create_view did not echo a name: {other:?}"
            ))),
        }
    }

    /// Subscribe to the table's deletion.
    pub fn on_delete(&self) -> Result<Subscription> {
        let id = self.client.next_request_id();
        let callback_id = self.client.next_callback_id();
        self.client.open_subscription(
            Message::table_method(id, &self.name, "on_delete", vec![])
                .with_subscription(callback_id),
        )
    }

    /// Detach a deletion subscription.
    pub async fn remove_delete(&self, subscription: Subscription) -> Result<()> {
        let id = self.client.next_request_id();
        self.client
            .request(
                Message::table_method(id, &self.name, "remove_delete", vec![])
                    .with_callback_id(subscription.callback_id()),
            )
            .await?;
        self.client.drop_subscription(subscription.request_id());
        Ok(())
    }

    async fn call(&self, method: &str, args: Vec<EngineValue>) -> Result<EngineValue> {
        let id = self.client.next_request_id();
        self.client
            .request(Message::table_method(id, &self.name, method, args))
            .await
    }
}

/// Proxy for a server-side view.
#[derive(Clone)]
pub struct ViewHandle {
    client: Client,
    name: String,
}

impl ViewHandle {
    /// The view's registered name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetch the view's column schema.
    pub async fn schema(&self) -> Result<EngineValue> {
        self.call("schema", vec![]).await
    }

    /// Fetch the view's row and column counts.
    pub async fn dimensions(&self) -> Result<EngineValue> {
        self.call("dimensions", vec![]).await
    }

    /// Serialize the view column-wise.
    pub async fn to_columns(&self, options: EngineValue) -> Result<EngineValue> {
        self.call("to_columns", vec![options]).await
    }

    /// Serialize the view row-wise.
    pub async fn to_rows(&self, options: EngineValue) -> Result<EngineValue> {
        self.call("to_rows", vec![options]).await
    }

    /// Serialize the view to a columnar binary buffer.
    pub async fn to_arrow(&self, options: EngineValue) -> Result<Bytes> {
        match self.call("to_arrow", vec![options]).await? {
            EngineValue::Binary(bytes) => Ok(bytes),
            other => Err(Error::UnexpectedResponse(format!(
                "to_arrow is not binary: {other:?}"
            ))),
        }
    }

    /// Subscribe to the view's updates.
    pub fn on_update(&self, mode: UpdateMode) -> Result<Subscription> {
        let id = self.client.next_request_id();
        let callback_id = self.client.next_callback_id();
        self.client.open_subscription(
            Message::view_method(id, &self.name, "on_update", vec![mode.to_options()])
                .with_subscription(callback_id),
        )
    }

    /// Detach an update subscription.
    pub async fn remove_update(&self, subscription: Subscription) -> Result<()> {
        let id = self.client.next_request_id();
        self.client
            .request(
                Message::view_method(id, &self.name, "remove_update", vec![])
                    .with_callback_id(subscription.callback_id()),
            )
            .await?;
        self.client.drop_subscription(subscription.request_id());
        Ok(())
    }

    /// Subscribe to the view's deletion.
    pub fn on_delete(&self) -> Result<Subscription> {
        let id = self.client.next_request_id();
        let callback_id = self.client.next_callback_id();
        self.client.open_subscription(
            Message::view_method(id, &self.name, "on_delete", vec![])
                .with_subscription(callback_id),
        )
    }

    /// Detach a deletion subscription.
    pub async fn remove_delete(&self, subscription: Subscription) -> Result<()> {
        let id = self.client.next_request_id();
        self.client
            .request(
                Message::view_method(id, &self.name, "remove_delete", vec![])
                    .with_callback_id(subscription.callback_id()),
            )
            .await?;
        self.client.drop_subscription(subscription.request_id());
        Ok(())
    }

    /// Delete the view, freeing its name for reuse.
    pub async fn delete(self) -> Result<()> {
        let id = self.client.next_request_id();
        self.client
            .request(Message::view_method(id, &self.name, "delete", vec![]))
            .await
            .map(|_| ())
    }

    async fn call(&self, method: &str, args: Vec<EngineValue>) -> Result<EngineValue> {
        let id = self.client.next_request_id();
        self.client
            .request(Message::view_method(id, &self.name, method, args))
            .await
    }
}
