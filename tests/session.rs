use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use ulid::Ulid;

use floorbook::archive::JsonlArchive;
use floorbook::auth::PasswordAuth;
use floorbook::engine::{Engine, InMemoryStore};
use floorbook::registry::TableRegistry;
use floorbook::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, std::path::PathBuf) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("floorbook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let archive = JsonlArchive::open(&dir.join("archive.jsonl")).unwrap();
    let engine = Arc::new(
        Engine::open(
            dir.join("floor.wal"),
            Arc::new(TableRegistry::default_floor()),
            InMemoryStore::new(),
            archive,
        )
        .unwrap(),
    );
    let auth = Arc::new(PasswordAuth::new("floorbook".into()));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine.clone();
            let auth = auth.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, auth).await;
            });
        }
    });

    (addr, dir)
}

struct Client {
    lines: Framed<TcpStream, LinesCodec>,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let socket = TcpStream::connect(addr).await.unwrap();
        Self {
            lines: Framed::new(socket, LinesCodec::new()),
        }
    }

    async fn login(addr: SocketAddr) -> Self {
        let mut client = Self::connect(addr).await;
        let reply = client
            .call(json!({ "action": "auth", "password": "floorbook" }))
            .await;
        assert_eq!(reply["ok"], json!(true), "{reply}");
        client
    }

    async fn call(&mut self, req: Value) -> Value {
        self.send_raw(&req.to_string()).await
    }

    async fn send_raw(&mut self, line: &str) -> Value {
        self.lines.send(line.to_string()).await.unwrap();
        let reply = self.lines.next().await.unwrap().unwrap();
        serde_json::from_str(&reply).unwrap()
    }

    async fn ok(&mut self, req: Value) -> Value {
        let reply = self.call(req).await;
        assert_eq!(reply["ok"], json!(true), "{reply}");
        reply["data"].clone()
    }

    async fn err_kind(&mut self, req: Value) -> String {
        let reply = self.call(req).await;
        assert_eq!(reply["ok"], json!(false), "{reply}");
        reply["error"]["kind"].as_str().unwrap().to_string()
    }
}

fn staff() -> Value {
    json!({ "id": "s1", "role": "staff" })
}

fn manager() -> Value {
    json!({ "id": "m1", "role": "manager" })
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn rejects_unauthenticated_client() {
    let (addr, _) = start_test_server().await;

    let mut client = Client::connect(addr).await;
    let reply = client.call(json!({ "action": "floor" })).await;
    assert_eq!(reply["ok"], json!(false));
    assert_eq!(reply["error"]["kind"], json!("AuthFailed"));
    // Server hangs up after a failed handshake.
    assert!(client.lines.next().await.is_none());

    let mut client = Client::connect(addr).await;
    let reply = client
        .call(json!({ "action": "auth", "password": "wrong" }))
        .await;
    assert_eq!(reply["error"]["kind"], json!("AuthFailed"));
}

#[tokio::test]
async fn full_service_over_the_wire() {
    let (addr, dir) = start_test_server().await;
    let mut client = Client::login(addr).await;

    let cell = client
        .ok(json!({
            "action": "create",
            "table": "A01",
            "booking": { "customer_name": "Lan", "customer_phone": "0901", "party_size": 4 },
            "actor": staff(),
        }))
        .await;
    assert_eq!(cell["status"], json!("HOLD"));
    let id = cell["booking_id"].as_str().unwrap().to_string();

    let tables = client
        .ok(json!({ "action": "merge", "source": "A01", "target": "A03", "booking_id": id, "actor": staff() }))
        .await;
    assert_eq!(tables, json!(["A01", "A03"]));

    let a03 = client.ok(json!({ "action": "cell", "table": "A03" })).await;
    assert_eq!(a03["booking_id"], json!(id));
    assert_eq!(a03["tables"], json!(["A01", "A03"]));

    let seated = client
        .ok(json!({ "action": "check_in", "booking_id": id, "actor": staff() }))
        .await;
    assert_eq!(seated["status"], json!("SEATED"));

    let tables = client
        .ok(json!({ "action": "split", "table": "A03", "booking_id": id, "actor": staff() }))
        .await;
    assert_eq!(tables, json!(["A01"]));
    assert_eq!(
        client.ok(json!({ "action": "cell", "table": "A03" })).await,
        Value::Null
    );

    let kind = client
        .err_kind(json!({ "action": "close", "booking_id": id, "actor": staff() }))
        .await;
    assert_eq!(kind, "ConfirmationRequired");

    let record = client
        .ok(json!({ "action": "close", "booking_id": id, "confirm": true, "actor": staff() }))
        .await;
    assert_eq!(record["status"], json!("CLOSED"));
    assert_eq!(record["tables"], json!([{ "area": "A", "table": "A01" }]));

    let summary = client.ok(json!({ "action": "summary" })).await;
    assert_eq!(summary["empty"], json!(83));

    let archived = JsonlArchive::read_all(&dir.join("archive.jsonl")).unwrap();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].booking_id.to_string(), id);
}

#[tokio::test]
async fn errors_carry_stable_kinds() {
    let (addr, _) = start_test_server().await;
    let mut client = Client::login(addr).await;

    let walk_in = client
        .ok(json!({ "action": "walk_in", "table": "B01", "party_size": 2, "actor": staff() }))
        .await;
    let id = walk_in["booking_id"].as_str().unwrap().to_string();

    let kind = client
        .err_kind(json!({ "action": "walk_in", "table": "B01", "party_size": 2, "actor": staff() }))
        .await;
    assert_eq!(kind, "TableOccupied");

    let kind = client
        .err_kind(json!({ "action": "cancel", "booking_id": id, "reason": "left", "actor": staff() }))
        .await;
    assert_eq!(kind, "Forbidden");

    let kind = client
        .err_kind(json!({ "action": "cancel", "booking_id": id, "actor": manager() }))
        .await;
    assert_eq!(kind, "ReasonRequired");

    let kind = client
        .err_kind(json!({ "action": "split", "table": "B01", "booking_id": id, "actor": staff() }))
        .await;
    assert_eq!(kind, "CannotSplitLastTable");

    let kind = client
        .err_kind(json!({ "action": "check_in", "booking_id": Ulid::new().to_string(), "actor": staff() }))
        .await;
    assert_eq!(kind, "BookingNotFound");

    let kind = client
        .err_kind(json!({ "action": "lock", "table": "C01", "actor": staff() }))
        .await;
    assert_eq!(kind, "Forbidden");

    let reply = client.send_raw("not json").await;
    assert_eq!(reply["error"]["kind"], json!("BadRequest"));

    // The connection survives rejected requests.
    client.ok(json!({ "action": "floor" })).await;
}

#[tokio::test]
async fn locks_are_shared_between_clients() {
    let (addr, _) = start_test_server().await;
    let mut manager_client = Client::login(addr).await;
    let mut staff_client = Client::login(addr).await;

    let changed = manager_client
        .ok(json!({ "action": "lock", "table": "SF2", "actor": manager() }))
        .await;
    assert_eq!(changed["changed"], json!(true));

    let kind = staff_client
        .err_kind(json!({ "action": "walk_in", "table": "SF2", "party_size": 6, "actor": staff() }))
        .await;
    assert_eq!(kind, "TableLocked");

    let locks = staff_client.ok(json!({ "action": "locks" })).await;
    assert_eq!(locks[0]["table"], json!("SF2"));
    assert_eq!(locks[0]["locked_by"], json!("m1"));

    let floor = staff_client.ok(json!({ "action": "floor" })).await;
    let vip = floor
        .as_array()
        .unwrap()
        .iter()
        .find(|a| a["area"]["id"] == json!("VIP_E"))
        .unwrap();
    assert_eq!(vip["tables"][1]["locked"], json!(true));

    let changed = manager_client
        .ok(json!({ "action": "unlock", "table": "SF2", "actor": manager() }))
        .await;
    assert_eq!(changed["changed"], json!(true));
    staff_client
        .ok(json!({ "action": "walk_in", "table": "SF2", "party_size": 6, "actor": staff() }))
        .await;
}

#[tokio::test]
async fn search_finds_customer() {
    let (addr, _) = start_test_server().await;
    let mut client = Client::login(addr).await;

    client
        .ok(json!({
            "action": "create",
            "table": "D04",
            "booking": { "customer_name": "Minh Tran", "party_size": 2, "time_of_day": "20:15" },
            "actor": staff(),
        }))
        .await;

    let hits = client.ok(json!({ "action": "search", "query": "minh" })).await;
    assert_eq!(hits.as_array().unwrap().len(), 1);
    assert_eq!(hits[0]["reserved_for"], json!(20 * 60 + 15));
}
