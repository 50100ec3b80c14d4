//! Shared fixtures for the integration tests.
//!
//! - `MockDiscovery` / `MockArchive`: `mockall` doubles of the dashboard's
//!   outbound collaborators.
//! - [`DATA`]: a small exam data set (one test with three tasks, one class
//!   with two students).
//! - [`TestClient`]: a student client talking the real wire protocol to the
//!   dashboard over an in-memory duplex pipe.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use proctor_core::protocol::messages::MessageType;
use proctor_core::{read_message, write_message, DiscoveryAnnouncement, Message};
use proctor_server::application::content::ExamContent;
use proctor_server::application::dashboard::{Dashboard, DashboardSettings};
use proctor_server::application::ports::{
    DiscoveryError, DiscoveryService, RowStore, TokenArchive, TokenListEntry,
};
use proctor_server::infrastructure::network::connection::drive_connection;
use proctor_server::infrastructure::storage::row_store::FileRowStore;
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;

mockall::mock! {
    pub Discovery {}
    impl DiscoveryService for Discovery {
        fn start(&self, announcement: DiscoveryAnnouncement) -> Result<(), DiscoveryError>;
        fn stop(&self);
        fn is_running(&self) -> bool;
    }
}

mockall::mock! {
    pub Archive {}
    impl TokenArchive for Archive {
        fn archive(&self, class_name: &str, entries: &[TokenListEntry]) -> std::io::Result<PathBuf>;
    }
}

pub const TEST_ID: i64 = 1;
pub const CLASS_ID: i64 = 3;

pub const DATA: &str = r#"
[[tests]]
id = 1
name = "Networking"

[[tasks]]
id = 10
test_id = 1
position = 1
question = "Port of HTTP?"
answers = "80|443|8080"
type = "choice"

[[tasks]]
id = 11
test_id = 1
position = 2
question = "Explain ARP."
type = "text"

[[tasks]]
id = 12
test_id = 1
position = 3
question = "Name a routing protocol."
type = "text"

[[classes]]
id = 3
name = "4AHIT"

[[students]]
id = 7
class_id = 3
first_name = "Ada"
last_name = "Lovelace"

[[students]]
id = 8
class_id = 3
first_name = "Alan"
last_name = "Turing"
"#;

/// Discovery double that accepts any number of calls.
pub fn quiet_discovery() -> MockDiscovery {
    let mut discovery = MockDiscovery::new();
    discovery.expect_start().returning(|_| Ok(()));
    discovery.expect_stop().return_const(());
    discovery.expect_is_running().return_const(false);
    discovery
}

/// Archive double that pretends every write succeeds.
pub fn quiet_archive() -> MockArchive {
    let mut archive = MockArchive::new();
    archive
        .expect_archive()
        .returning(|_, _| Ok(PathBuf::from("tokens.txt")));
    archive
}

pub fn seeded_store() -> Arc<FileRowStore> {
    Arc::new(FileRowStore::from_toml(DATA).expect("fixture data parses"))
}

/// A dashboard over [`DATA`] with silent collaborators.
pub fn make_dashboard() -> Arc<Dashboard> {
    make_dashboard_with(seeded_store(), quiet_discovery(), quiet_archive())
}

pub fn make_dashboard_with(
    store: Arc<FileRowStore>,
    discovery: MockDiscovery,
    archive: MockArchive,
) -> Arc<Dashboard> {
    let store: Arc<dyn RowStore> = store;
    Dashboard::new(
        DashboardSettings::default(),
        ExamContent::new(store),
        Arc::new(discovery),
        Arc::new(archive),
    )
}

/// Selects the fixture test and hosts the fixture class.  Returns the tokens
/// of Ada and Alan, in that order.
pub async fn host(dashboard: &Dashboard, minutes: u64) -> (String, String) {
    dashboard
        .select_test(proctor_server::application::content::TestSelector::Id(TEST_ID))
        .await
        .expect("select test");
    let issued = dashboard
        .prepare_hosting(CLASS_ID, minutes)
        .await
        .expect("prepare hosting");
    (issued[0].token.clone(), issued[1].token.clone())
}

/// A student client connected through an in-memory pipe.
pub struct TestClient {
    stream: DuplexStream,
    server: JoinHandle<()>,
}

impl TestClient {
    pub fn connect(dashboard: &Arc<Dashboard>) -> Self {
        let (client_side, server_side) = tokio::io::duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(server_side);
        let peer: SocketAddr = "192.168.1.50:40000".parse().expect("peer address");
        let server = tokio::spawn(drive_connection(reader, writer, peer, Arc::clone(dashboard)));
        Self {
            stream: client_side,
            server,
        }
    }

    pub async fn send(&mut self, kind: MessageType, token: &str, args: &[(&str, &str)]) {
        let mut message = Message::new("student", kind, token);
        for (key, value) in args {
            message.push_arg(*key, *value);
        }
        write_message(&mut self.stream, &message)
            .await
            .expect("client write");
    }

    /// Next message from the server; panics on EOF or after five seconds.
    pub async fn recv(&mut self) -> Message {
        tokio::time::timeout(Duration::from_secs(5), read_message(&mut self.stream))
            .await
            .expect("server reply in time")
            .expect("well-formed frame")
            .expect("connection still open")
    }

    /// Waits for the server to close the connection.
    pub async fn expect_closed(&mut self) {
        let next = tokio::time::timeout(Duration::from_secs(5), read_message(&mut self.stream))
            .await
            .expect("close in time")
            .expect("well-formed frame");
        assert!(next.is_none(), "expected EOF, got {next:?}");
    }

    /// Authenticates and returns the `AUTH_OK` reply.
    pub async fn auth(&mut self, token: &str) -> Message {
        self.send(MessageType::Auth, token, &[]).await;
        self.recv().await
    }

    /// Closes the client side and waits for the server driver to finish.
    pub async fn disconnect(self) {
        drop(self.stream);
        self.server.await.expect("connection driver");
    }
}
