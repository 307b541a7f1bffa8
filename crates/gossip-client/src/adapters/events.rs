//! Terminal implementation of the [`AppEvents`] port: session events are
//! printed for the user instead of being forwarded to a desktop frontend.

use async_trait::async_trait;

use gossip_core::client::ports::{AppEvents, ChatMessage};
use gossip_core::domain::id::ClientId;

pub struct TerminalEvents;

#[async_trait]
impl AppEvents for TerminalEvents {
    async fn server_name(&self, name: &str) {
        println!("* connected to: {name}");
    }

    async fn client_id(&self, id: &ClientId) {
        println!("* your client id: {id}");
    }

    async fn channel_update(&self, channel: &str) {
        println!("* channel available: #{channel}");
    }

    async fn handshake_complete(&self) {
        println!("* handshake finished, you are live");
    }

    async fn message_received(&self, message: ChatMessage) {
        println!(
            "[#{}] <{}> {}",
            message.channel, message.sender_uid, message.body
        );
    }

    async fn call_starting(&self) {
        println!("* call starting...");
    }

    async fn call_active(&self, call_id: &str) {
        println!("* call active: {call_id}");
    }

    async fn call_not_found(&self, call_id: &str) {
        println!("* no such call: {call_id}");
    }

    async fn peer_connected(&self, peer: &ClientId) {
        println!("* {peer} joined the call");
    }

    async fn peer_hung_up(&self, peer: &ClientId) {
        println!("* {peer} hung up");
    }

    async fn self_hung_up(&self) {
        println!("* you left the call");
    }

    async fn unauthorized(&self) {
        println!("* wrong password, the hub turned you away");
    }

    async fn server_disconnect(&self) {
        println!("* connection to the hub lost");
    }
}
