//! WebSocket gateway. Each connection runs a send/receive task pair:
//! commands come in as JSON text frames, events go out the same way.

pub mod connection;

use std::sync::Arc;

use pulse_core::pipeline::MessagePipeline;
use pulse_core::presence::PresenceRegistry;
use pulse_core::receipts::ReceiptTracker;
use pulse_core::router::RoomRouter;
use pulse_db::Database;

/// Everything a connection loop needs, cloned per connection.
#[derive(Clone)]
pub struct GatewayContext {
    pub db: Arc<Database>,
    pub registry: PresenceRegistry,
    pub router: RoomRouter,
    pub pipeline: MessagePipeline,
    pub receipts: ReceiptTracker,
}
