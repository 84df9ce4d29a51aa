// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! End-to-end command scenarios: a session driven over channels, against a
//! scripted UDP responder standing in for the SIP proxy's management
//! interface and event sender.

use call_api::config::{Config, MiConfig};
use call_api::rpc::{Notification, Request, Response, RpcError};
use call_api::{Proxy, Session};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout;

const MAX_DATAGRAM: usize = 65535;

/// Scripted stand-in for the SIP proxy: answers every MI request (with a
/// canned error or result where configured), reports each decoded request,
/// and can push event notifications at the gateway's event listener.
struct FakeProxy {
    addr: SocketAddr,
    requests: mpsc::UnboundedReceiver<Request>,
    errors: Arc<Mutex<HashMap<String, RpcError>>>,
    results: Arc<Mutex<HashMap<String, Value>>>,
    event_listener: Arc<Mutex<Option<SocketAddr>>>,
    sender: UdpSocket,
}

impl FakeProxy {
    async fn spawn() -> FakeProxy {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let (requests_tx, requests) = mpsc::unbounded_channel();
        let errors: Arc<Mutex<HashMap<String, RpcError>>> = Arc::default();
        let results: Arc<Mutex<HashMap<String, Value>>> = Arc::default();
        let event_listener: Arc<Mutex<Option<SocketAddr>>> = Arc::default();

        let responder_errors = Arc::clone(&errors);
        let responder_results = Arc::clone(&results);
        let responder_listener = Arc::clone(&event_listener);
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                let (n, from) = socket.recv_from(&mut buf).await.unwrap();
                let request: Request = serde_json::from_slice(&buf[..n]).unwrap();

                // Remember where events should be pushed.
                if request.method == "event_subscribe" {
                    let socket_param = request
                        .params
                        .as_ref()
                        .and_then(|p| p.get("socket"))
                        .and_then(Value::as_str)
                        .and_then(|s| s.strip_prefix("udp:"))
                        .and_then(|s| s.parse().ok());
                    *responder_listener.lock().unwrap() = socket_param;
                }

                let canned_error = responder_errors.lock().unwrap().get(&request.method).cloned();
                let response = match canned_error {
                    Some(error) => Response::error(request.id.clone(), error),
                    None => {
                        let result = responder_results
                            .lock()
                            .unwrap()
                            .get(&request.method)
                            .cloned()
                            .unwrap_or_else(|| json!("OK"));
                        Response::result(request.id.clone(), result)
                    }
                };
                socket
                    .send_to(&serde_json::to_vec(&response).unwrap(), from)
                    .await
                    .unwrap();
                if requests_tx.send(request).is_err() {
                    return;
                }
            }
        });

        FakeProxy {
            addr,
            requests,
            errors,
            results,
            event_listener,
            sender: UdpSocket::bind("127.0.0.1:0").await.unwrap(),
        }
    }

    fn fail(&self, method: &str, code: i64, message: &str) {
        self.errors
            .lock()
            .unwrap()
            .insert(method.to_owned(), RpcError::new(code, message));
    }

    fn result(&self, method: &str, result: Value) {
        self.results
            .lock()
            .unwrap()
            .insert(method.to_owned(), result);
    }

    async fn next_request(&mut self) -> Request {
        timeout(Duration::from_secs(5), self.requests.recv())
            .await
            .expect("timed out waiting for an MI request")
            .expect("responder gone")
    }

    /// Push an event notification at the listener captured from the last
    /// `event_subscribe`.
    async fn emit(&self, event: &str, params: Value) {
        let listener = self
            .event_listener
            .lock()
            .unwrap()
            .expect("no event listener registered yet");
        let notification = Notification::new(event, params);
        self.sender
            .send_to(&serde_json::to_vec(&notification).unwrap(), listener)
            .await
            .unwrap();
    }
}

async fn start_session(fake: &FakeProxy) -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
    let config = Config {
        mi: MiConfig {
            url: Some(fake.addr.to_string()),
        },
        ..Config::default()
    };
    let proxy = Proxy::new(&config).await.unwrap();
    let (incoming_tx, incoming_rx) = mpsc::channel(16);
    let (outgoing_tx, outgoing_rx) = mpsc::channel(16);
    tokio::spawn(Session::new(proxy).run(incoming_rx, outgoing_tx));
    (incoming_tx, outgoing_rx)
}

async fn send(tx: &mpsc::Sender<String>, request: Value) {
    tx.send(request.to_string()).await.unwrap();
}

async fn recv(rx: &mut mpsc::Receiver<String>) -> Value {
    let text = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a message from the session")
        .expect("session gone");
    serde_json::from_str(&text).unwrap()
}

async fn assert_silent(rx: &mut mpsc::Receiver<String>) {
    if let Ok(Some(text)) = timeout(Duration::from_millis(200), rx.recv()).await {
        panic!("expected no further messages, got {text}");
    }
}

#[tokio::test]
async fn call_end_runs_to_completion() {
    let mut fake = FakeProxy::spawn().await;
    let (tx, mut rx) = start_session(&fake).await;

    send(
        &tx,
        json!({ "jsonrpc": "2.0", "id": 1, "method": "CallEnd", "params": { "callid": "abc" } }),
    )
    .await;

    let reply = recv(&mut rx).await;
    assert_eq!(reply["id"], 1);
    assert_eq!(reply["result"]["status"], "Started");
    let cmd_id = reply["result"]["cmd_id"].as_str().unwrap().to_owned();

    let request = fake.next_request().await;
    assert_eq!(request.method, "dlg_end_dlg");
    assert_eq!(request.params.unwrap()["dialog_id"], "abc");

    let ended = recv(&mut rx).await;
    assert_eq!(ended["method"], "Ended");
    assert_eq!(ended["params"]["cmd_id"], cmd_id.as_str());
}

#[tokio::test]
async fn call_end_reports_remote_errors() {
    let mut fake = FakeProxy::spawn().await;
    fake.fail("dlg_end_dlg", -1, "No such dialog");
    let (tx, mut rx) = start_session(&fake).await;

    send(
        &tx,
        json!({ "jsonrpc": "2.0", "id": 1, "method": "CallEnd", "params": { "callid": "abc" } }),
    )
    .await;

    let reply = recv(&mut rx).await;
    let cmd_id = reply["result"]["cmd_id"].as_str().unwrap().to_owned();
    fake.next_request().await;

    let error = recv(&mut rx).await;
    assert_eq!(error["method"], "Error");
    assert_eq!(error["params"]["cmd_id"], cmd_id.as_str());
    assert_eq!(error["params"]["error_msg"], "-1 No such dialog");

    let ended = recv(&mut rx).await;
    assert_eq!(ended["method"], "Ended");
    assert_eq!(ended["params"]["cmd_id"], cmd_id.as_str());
}

#[tokio::test]
async fn unknown_methods_are_rejected_without_notifications() {
    let fake = FakeProxy::spawn().await;
    let (tx, mut rx) = start_session(&fake).await;

    send(
        &tx,
        json!({ "jsonrpc": "2.0", "id": 7, "method": "DoesNotExist", "params": {} }),
    )
    .await;

    let reply = recv(&mut rx).await;
    assert_eq!(reply["id"], 7);
    assert_eq!(reply["error"]["code"], 32000);
    assert_eq!(reply["error"]["message"], "unknown JSON-RPC method");
    assert_silent(&mut rx).await;
}

#[tokio::test]
async fn non_string_params_are_rejected_without_notifications() {
    let fake = FakeProxy::spawn().await;
    let (tx, mut rx) = start_session(&fake).await;

    send(
        &tx,
        json!({ "jsonrpc": "2.0", "id": 8, "method": "CallEnd", "params": { "callid": 42 } }),
    )
    .await;

    let reply = recv(&mut rx).await;
    assert_eq!(reply["id"], 8);
    assert_eq!(reply["error"]["code"], 32000);
    assert_eq!(reply["error"]["message"], "bad JSON-RPC parameters");
    assert_silent(&mut rx).await;
}

#[tokio::test]
async fn unparseable_and_non_object_requests_are_rejected() {
    let fake = FakeProxy::spawn().await;
    let (tx, mut rx) = start_session(&fake).await;

    tx.send("{ not json".to_owned()).await.unwrap();
    let reply = recv(&mut rx).await;
    assert_eq!(reply["id"], "");
    assert_eq!(reply["error"]["code"], 32000);
    assert_eq!(reply["error"]["message"], "failed to parse JSON-RPC request");

    send(
        &tx,
        json!({ "jsonrpc": "2.0", "id": 9, "method": "CallEnd", "params": ["abc"] }),
    )
    .await;
    let reply = recv(&mut rx).await;
    assert_eq!(reply["id"], 9);
    assert_eq!(
        reply["error"]["message"],
        "non-object parameters are not accepted"
    );
}

#[tokio::test]
async fn blind_transfer_walks_through_to_success() {
    let mut fake = FakeProxy::spawn().await;
    let (tx, mut rx) = start_session(&fake).await;

    send(
        &tx,
        json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "CallBlindTransfer",
            "params": { "callid": "c1", "leg": "caller", "destination": "sip:bob@x" },
        }),
    )
    .await;

    let reply = recv(&mut rx).await;
    assert_eq!(reply["result"]["status"], "Started");
    let cmd_id = reply["result"]["cmd_id"].as_str().unwrap().to_owned();

    let subscribe = fake.next_request().await;
    assert_eq!(subscribe.method, "event_subscribe");
    let params = subscribe.params.unwrap();
    assert_eq!(params["event"], "E_CALL_TRANSFER");
    assert_eq!(params["expire"], 120);

    let transfer = fake.next_request().await;
    assert_eq!(transfer.method, "call_transfer");
    let params = transfer.params.unwrap();
    assert_eq!(params["callid"], "c1");
    assert_eq!(params["leg"], "caller");
    assert_eq!(params["destination"], "sip:bob@x");

    let event = recv(&mut rx).await;
    assert_eq!(event["method"], "Event");
    assert_eq!(event["params"]["cmd_id"], cmd_id.as_str());
    assert_eq!(event["params"]["data"]["event"], "Transferring");
    assert_eq!(event["params"]["data"]["params"]["destination"], "sip:bob@x");

    // An event for some other call must not reach this command.
    fake.emit(
        "E_CALL_TRANSFER",
        json!({ "callid": "other", "state": "failure", "status": "486" }),
    )
    .await;
    fake.emit(
        "E_CALL_TRANSFER",
        json!({
            "callid": "c1",
            "state": "start",
            "status": "",
            "destination": "sip:bob@x",
            "transfer_callid": "t1",
        }),
    )
    .await;

    let event = recv(&mut rx).await;
    assert_eq!(event["params"]["data"]["event"], "TransferStart");
    assert_eq!(event["params"]["data"]["params"]["callid"], "t1");
    assert_eq!(event["params"]["data"]["params"]["destination"], "sip:bob@x");

    fake.emit(
        "E_CALL_TRANSFER",
        json!({ "callid": "c1", "state": "ok", "status": "", "transfer_callid": "t1" }),
    )
    .await;

    let event = recv(&mut rx).await;
    assert_eq!(event["params"]["data"]["event"], "TransferSuccessful");
    assert_eq!(event["params"]["data"]["params"]["callid"], "t1");
    assert_eq!(event["params"]["data"]["params"]["destination"], "sip:bob@x");

    let end_dialog = fake.next_request().await;
    assert_eq!(end_dialog.method, "dlg_end_dlg");
    assert_eq!(end_dialog.params.unwrap()["dialog_id"], "c1");

    let unsubscribe = fake.next_request().await;
    assert_eq!(unsubscribe.method, "event_subscribe");
    assert_eq!(unsubscribe.params.unwrap()["expire"], 0);

    let ended = recv(&mut rx).await;
    assert_eq!(ended["method"], "Ended");
    assert_eq!(ended["params"]["cmd_id"], cmd_id.as_str());
}

#[tokio::test]
async fn blind_transfer_failure_surfaces_as_an_error() {
    let mut fake = FakeProxy::spawn().await;
    let (tx, mut rx) = start_session(&fake).await;

    send(
        &tx,
        json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "CallBlindTransfer",
            "params": { "callid": "c1", "leg": "caller", "destination": "sip:bob@x" },
        }),
    )
    .await;
    recv(&mut rx).await;
    fake.next_request().await;
    fake.next_request().await;
    let event = recv(&mut rx).await;
    assert_eq!(event["params"]["data"]["event"], "Transferring");

    fake.emit(
        "E_CALL_TRANSFER",
        json!({ "callid": "c1", "state": "failure", "status": "486 Busy Here" }),
    )
    .await;

    let error = recv(&mut rx).await;
    assert_eq!(error["method"], "Error");
    assert_eq!(
        error["params"]["error_msg"],
        "Transfer failed with status 486 Busy Here"
    );

    // The subscription is still released on the failure path.
    let unsubscribe = fake.next_request().await;
    assert_eq!(unsubscribe.method, "event_subscribe");
    assert_eq!(unsubscribe.params.unwrap()["expire"], 0);

    let ended = recv(&mut rx).await;
    assert_eq!(ended["method"], "Ended");
}

#[tokio::test]
async fn attended_transfer_ends_the_original_dialog_exactly_once() {
    let mut fake = FakeProxy::spawn().await;
    let (tx, mut rx) = start_session(&fake).await;

    send(
        &tx,
        json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "CallAttendedTransfer",
            "params": { "callidA": "a1", "legA": "caller", "callidB": "b1", "legB": "callee" },
        }),
    )
    .await;
    recv(&mut rx).await;

    let subscribe = fake.next_request().await;
    assert_eq!(subscribe.method, "event_subscribe");

    let transfer = fake.next_request().await;
    assert_eq!(transfer.method, "call_transfer");
    let params = transfer.params.unwrap();
    assert_eq!(params["callid"], "a1");
    assert_eq!(params["transfer_callid"], "b1");
    assert_eq!(params["transfer_leg"], "callee");

    let event = recv(&mut rx).await;
    assert_eq!(event["params"]["data"]["event"], "Transferring");

    // A provisional with a 2xx status tears the original dialog down early.
    fake.emit(
        "E_CALL_TRANSFER",
        json!({ "callid": "a1", "state": "trying", "status": "200 OK", "transfer_callid": "b1" }),
    )
    .await;

    let end_dialog = fake.next_request().await;
    assert_eq!(end_dialog.method, "dlg_end_dlg");
    assert_eq!(end_dialog.params.unwrap()["dialog_id"], "a1");

    let event = recv(&mut rx).await;
    assert_eq!(event["params"]["data"]["event"], "TransferPending");
    assert_eq!(event["params"]["data"]["params"]["extra"], "200 OK");

    // The final ok must not end it a second time.
    fake.emit(
        "E_CALL_TRANSFER",
        json!({ "callid": "a1", "state": "ok", "status": "200 OK", "transfer_callid": "b1" }),
    )
    .await;

    let event = recv(&mut rx).await;
    assert_eq!(event["params"]["data"]["event"], "TransferSuccessful");
    assert_eq!(event["params"]["data"]["params"]["callid"], "b1");

    // Straight to the unsubscribe; no second dlg_end_dlg.
    let unsubscribe = fake.next_request().await;
    assert_eq!(unsubscribe.method, "event_subscribe");
    assert_eq!(unsubscribe.params.unwrap()["expire"], 0);

    let ended = recv(&mut rx).await;
    assert_eq!(ended["method"], "Ended");
}

#[tokio::test]
async fn hold_completes_once_both_legs_are_done() {
    let mut fake = FakeProxy::spawn().await;
    let (tx, mut rx) = start_session(&fake).await;

    send(
        &tx,
        json!({ "jsonrpc": "2.0", "id": 4, "method": "CallHold", "params": { "callid": "c1" } }),
    )
    .await;
    recv(&mut rx).await;

    let subscribe = fake.next_request().await;
    assert_eq!(subscribe.method, "event_subscribe");
    assert_eq!(subscribe.params.unwrap()["event"], "E_CALL_HOLD");

    let hold = fake.next_request().await;
    assert_eq!(hold.method, "call_hold");
    assert_eq!(hold.params.unwrap()["callid"], "c1");

    let event = recv(&mut rx).await;
    assert_eq!(event["params"]["data"]["event"], "CallHolding");

    for leg in ["caller", "callee"] {
        fake.emit("E_CALL_HOLD", json!({ "state": "start", "leg": leg }))
            .await;
        let event = recv(&mut rx).await;
        assert_eq!(event["params"]["data"]["event"], "CallHoldStart");
        assert_eq!(event["params"]["data"]["params"]["leg"], leg);

        fake.emit("E_CALL_HOLD", json!({ "state": "ok", "leg": leg }))
            .await;
        let event = recv(&mut rx).await;
        assert_eq!(event["params"]["data"]["event"], "CallHoldSuccessful");
        assert_eq!(event["params"]["data"]["params"]["leg"], leg);
    }

    let unsubscribe = fake.next_request().await;
    assert_eq!(unsubscribe.method, "event_subscribe");
    assert_eq!(unsubscribe.params.unwrap()["expire"], 0);

    let ended = recv(&mut rx).await;
    assert_eq!(ended["method"], "Ended");
}

#[tokio::test]
async fn unhold_uses_its_own_mi_command_and_event_names() {
    let mut fake = FakeProxy::spawn().await;
    let (tx, mut rx) = start_session(&fake).await;

    send(
        &tx,
        json!({ "jsonrpc": "2.0", "id": 5, "method": "CallUnhold", "params": { "callid": "c1" } }),
    )
    .await;
    recv(&mut rx).await;
    fake.next_request().await;

    let unhold = fake.next_request().await;
    assert_eq!(unhold.method, "call_unhold");

    let event = recv(&mut rx).await;
    assert_eq!(event["params"]["data"]["event"], "CallUnholding");
}

#[tokio::test]
async fn call_start_dials_transfers_and_hangs_up() {
    let mut fake = FakeProxy::spawn().await;
    fake.result(
        "t_uac_dlg",
        json!({
            "Status": "200 OK",
            "RURI": "sip:alice@10.0.0.9:5060",
            "Message": "From: <sip:alice@x>;tag=1\r\n\
                        To: <sip:gw@y>;tag=2\r\n\
                        Call-ID: start-1\r\n\
                        Server: sip-proxy\r\n",
        }),
    );
    let (tx, mut rx) = start_session(&fake).await;

    send(
        &tx,
        json!({
            "jsonrpc": "2.0",
            "id": 6,
            "method": "CallStart",
            "params": { "caller": "sip:alice@x", "callee": "sip:bob@x", "cmd_id": "start-1" },
        }),
    )
    .await;

    let reply = recv(&mut rx).await;
    assert_eq!(reply["result"]["cmd_id"], "start-1");

    let invite = fake.next_request().await;
    assert_eq!(invite.method, "t_uac_dlg");
    let params = invite.params.unwrap();
    assert_eq!(params["method"], "INVITE");
    assert_eq!(params["ruri"], "sip:alice@x");
    let headers = params["headers"].as_str().unwrap();
    assert!(headers.contains("From: <sip:alice@x>\r\n"));
    assert!(headers.contains("To: <sip:bob@x>\r\n"));
    assert!(headers.contains("Call-Id: start-1\r\n"));
    assert!(params["body"].as_str().unwrap().contains("PCMU/8000"));

    let event = recv(&mut rx).await;
    assert_eq!(event["params"]["data"]["event"], "CallerAnswered");

    let subscribe = fake.next_request().await;
    assert_eq!(subscribe.method, "event_subscribe");
    assert_eq!(subscribe.params.unwrap()["event"], "E_CALL_TRANSFER");

    // The transfer only goes out after the quiescence pause.
    let transfer = fake.next_request().await;
    assert_eq!(transfer.method, "call_transfer");
    let params = transfer.params.unwrap();
    assert_eq!(params["callid"], "start-1");
    assert_eq!(params["leg"], "callee");
    assert_eq!(params["destination"], "sip:bob@x");

    let event = recv(&mut rx).await;
    assert_eq!(event["params"]["data"]["event"], "Transferring");

    fake.emit(
        "E_CALL_TRANSFER",
        json!({ "callid": "start-1", "state": "ok", "status": "200 OK", "transfer_callid": "t9" }),
    )
    .await;

    let event = recv(&mut rx).await;
    assert_eq!(event["params"]["data"]["event"], "CalleeAnswered");
    assert_eq!(event["params"]["data"]["params"]["callid"], "t9");
    assert_eq!(event["params"]["data"]["params"]["caller"], "sip:alice@x");
    assert_eq!(event["params"]["data"]["params"]["callee"], "sip:bob@x");

    // The original leg goes down with a BYE re-using the dialog headers.
    let bye = fake.next_request().await;
    assert_eq!(bye.method, "t_uac_dlg");
    let params = bye.params.unwrap();
    assert_eq!(params["method"], "BYE");
    assert_eq!(params["ruri"], "sip:alice@10.0.0.9:5060");
    let headers = params["headers"].as_str().unwrap();
    assert!(headers.contains("From: <sip:alice@x>;tag=1\r\n"));
    assert!(headers.contains("To: <sip:gw@y>;tag=2\r\n"));
    assert!(headers.contains("Call-ID: start-1\r\n"));
    assert!(headers.ends_with("CSeq: 3 BYE\r\n"));
    assert!(!headers.contains("Server:"));

    let unsubscribe = fake.next_request().await;
    assert_eq!(unsubscribe.method, "event_subscribe");
    assert_eq!(unsubscribe.params.unwrap()["expire"], 0);

    let ended = recv(&mut rx).await;
    assert_eq!(ended["method"], "Ended");
    assert_eq!(ended["params"]["cmd_id"], "start-1");
}

#[tokio::test]
async fn call_start_routes_the_invite_through_the_configured_next_hop() {
    let mut fake = FakeProxy::spawn().await;
    fake.result("t_uac_dlg", json!({ "Status": "404 Not Found" }));

    let config = Config {
        mi: MiConfig {
            url: Some(fake.addr.to_string()),
        },
        sip: call_api::config::SipConfig {
            uri: Some("sip:10.0.0.5:5060".to_owned()),
        },
        ..Config::default()
    };
    let proxy = Proxy::new(&config).await.unwrap();
    let (incoming_tx, incoming_rx) = mpsc::channel(16);
    let (outgoing_tx, mut rx) = mpsc::channel(16);
    tokio::spawn(Session::new(proxy).run(incoming_rx, outgoing_tx));

    send(
        &incoming_tx,
        json!({
            "jsonrpc": "2.0",
            "id": 6,
            "method": "CallStart",
            "params": { "caller": "sip:alice@x", "callee": "sip:bob@x" },
        }),
    )
    .await;
    recv(&mut rx).await;

    let invite = fake.next_request().await;
    assert_eq!(invite.params.unwrap()["next_hop"], "sip:10.0.0.5:5060");
}

#[tokio::test]
async fn call_start_rejects_a_failed_initial_call() {
    let mut fake = FakeProxy::spawn().await;
    fake.result("t_uac_dlg", json!({ "Status": "486 Busy Here" }));
    let (tx, mut rx) = start_session(&fake).await;

    send(
        &tx,
        json!({
            "jsonrpc": "2.0",
            "id": 6,
            "method": "CallStart",
            "params": { "caller": "sip:alice@x", "callee": "sip:bob@x" },
        }),
    )
    .await;
    recv(&mut rx).await;
    fake.next_request().await;

    let error = recv(&mut rx).await;
    assert_eq!(error["method"], "Error");
    assert_eq!(
        error["params"]["error_msg"],
        "failed to establish initial call: 486 Busy Here"
    );
    let ended = recv(&mut rx).await;
    assert_eq!(ended["method"], "Ended");
}

#[tokio::test]
async fn concurrent_commands_are_multiplexed_on_one_session() {
    let mut fake = FakeProxy::spawn().await;
    let (tx, mut rx) = start_session(&fake).await;

    // A transfer that will sit waiting for events...
    send(
        &tx,
        json!({
            "jsonrpc": "2.0",
            "id": 10,
            "method": "CallBlindTransfer",
            "params": { "callid": "c1", "leg": "caller", "destination": "sip:bob@x", "cmd_id": "xfer" },
        }),
    )
    .await;
    let reply = recv(&mut rx).await;
    assert_eq!(reply["result"]["cmd_id"], "xfer");
    fake.next_request().await;
    fake.next_request().await;
    let event = recv(&mut rx).await;
    assert_eq!(event["params"]["cmd_id"], "xfer");

    // ...does not stop an unrelated CallEnd from completing.
    send(
        &tx,
        json!({
            "jsonrpc": "2.0",
            "id": 11,
            "method": "CallEnd",
            "params": { "callid": "c9", "cmd_id": "end" },
        }),
    )
    .await;
    let reply = recv(&mut rx).await;
    assert_eq!(reply["result"]["cmd_id"], "end");
    let request = fake.next_request().await;
    assert_eq!(request.method, "dlg_end_dlg");
    let ended = recv(&mut rx).await;
    assert_eq!(ended["method"], "Ended");
    assert_eq!(ended["params"]["cmd_id"], "end");

    // The transfer then finishes independently.
    fake.emit(
        "E_CALL_TRANSFER",
        json!({ "callid": "c1", "state": "ok", "status": "", "transfer_callid": "t1" }),
    )
    .await;
    let event = recv(&mut rx).await;
    assert_eq!(event["params"]["cmd_id"], "xfer");
    assert_eq!(event["params"]["data"]["event"], "TransferSuccessful");
    let ended = recv(&mut rx).await;
    assert_eq!(ended["method"], "Ended");
    assert_eq!(ended["params"]["cmd_id"], "xfer");

    fake.next_request().await; // dlg_end_dlg for c1
    let unsubscribe = fake.next_request().await;
    assert_eq!(unsubscribe.method, "event_subscribe");
}
