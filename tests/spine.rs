//! Call spine tests.

mod common;

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::mpsc;

use convoke::call::CallHandler;
use convoke::call::CallInitiator;
use convoke::call::CallPair;
use convoke::call::ClientMetadata;
use convoke::call::Message;
use convoke::call::MessageFlags;
use convoke::call::ServerMetadata;
use convoke::call::ServerTrailingMetadata;
use convoke::call::StatusCode;
use convoke::call::forward_call;
use convoke::call::make_call_pair;
use convoke::promise::Poll;
use convoke::promise::Promise;

use self::common::WAIT_TIMEOUT;
use self::common::make_arena;

/// What the client observed, in observation order.
#[derive(Debug, PartialEq, Eq)]
enum Event {
  InitialMetadata,
  Message(Vec<u8>),
  NoInitialMetadata,
  TrailingMetadata(StatusCode),
}

/// Spawns a client-side receive loop on the initiator's activity and
/// returns a channel yielding the observed events.
fn spawn_client_receiver(initiator: &CallInitiator) -> mpsc::Receiver<Vec<Event>> {
  let (sender, receiver) = mpsc::channel::<Vec<Event>>();

  let mut initial = initiator.pull_server_initial_metadata();
  let mut messages = initiator.pull_message();
  let mut trailing = initiator.pull_server_trailing_metadata();
  let mut events: Vec<Event> = Vec::new();
  let mut phase: u8 = 0;

  initiator.spawn(
    "client_receiver",
    move || {
      loop {
        match phase {
          0 => match initial.poll() {
            Poll::Ready(Ok(Some(_metadata))) => {
              events.push(Event::InitialMetadata);
              phase = 1;
            }
            Poll::Ready(Ok(None)) => {
              events.push(Event::NoInitialMetadata);
              phase = 2;
            }
            Poll::Ready(Err(_status)) => {
              events.push(Event::NoInitialMetadata);
              phase = 2;
            }
            Poll::Pending => return Poll::Pending,
          },
          1 => match messages.poll() {
            Poll::Ready(Some(message)) => events.push(Event::Message(message.into_payload())),
            Poll::Ready(None) => phase = 2,
            Poll::Pending => return Poll::Pending,
          },
          _ => match trailing.poll() {
            Poll::Ready(metadata) => {
              events.push(Event::TrailingMetadata(metadata.status()));
              return Poll::Ready(std::mem::take(&mut events));
            }
            Poll::Pending => return Poll::Pending,
          },
        }
      }
    },
    move |events: Vec<Event>| {
      sender.send(events).unwrap();
    },
  );

  receiver
}

/// Spawns an echo server on the handler's activity: it drains the client's
/// messages, then responds with initial metadata, the same payloads, and
/// an OK trailing metadata.
fn spawn_echo_server(handler: &CallHandler) {
  let respond: CallHandler = handler.clone();
  let mut messages = handler.pull_message();
  let mut received: Vec<Vec<u8>> = Vec::new();

  handler.spawn(
    "echo_server",
    move || {
      loop {
        match messages.poll() {
          Poll::Ready(Some(message)) => received.push(message.into_payload()),
          Poll::Ready(None) => {
            let mut metadata: ServerMetadata = ServerMetadata::new();
            metadata.append("echo", "true");
            respond.spawn_push_server_initial_metadata(metadata);

            for payload in received.drain(..) {
              respond.spawn_push_message(Message::new(payload, MessageFlags::empty()));
            }

            respond.spawn_push_server_trailing_metadata(ServerTrailingMetadata::new(
              StatusCode::Ok,
            ));

            return Poll::Ready(());
          }
          Poll::Pending => return Poll::Pending,
        }
      }
    },
    |_| {},
  );
}

fn client_metadata() -> ClientMetadata {
  let mut metadata: ClientMetadata = ClientMetadata::new();

  metadata.append("path", "/echo.Echo/BidiEcho");
  metadata
}

#[test]
fn test_forwarded_call_happy_path() {
  let arena = make_arena();
  let inbound: CallPair = make_call_pair(client_metadata(), arena.clone());
  let outbound: CallPair = make_call_pair(client_metadata(), arena);

  let observed: Arc<Mutex<Vec<StatusCode>>> = Arc::new(Mutex::new(Vec::new()));

  {
    let observed: Arc<Mutex<Vec<StatusCode>>> = Arc::clone(&observed);

    forward_call(
      inbound.handler.start(),
      outbound.initiator.clone(),
      move |metadata: &ServerTrailingMetadata| {
        observed.lock().unwrap().push(metadata.status());
      },
    );
  }

  spawn_echo_server(&outbound.handler.start());

  let events: mpsc::Receiver<Vec<Event>> = spawn_client_receiver(&inbound.initiator);

  inbound
    .initiator
    .spawn_push_message(Message::new(b"first".to_vec(), MessageFlags::empty()));
  inbound
    .initiator
    .spawn_push_message(Message::new(b"second".to_vec(), MessageFlags::empty()));
  inbound.initiator.spawn_finish_sends();

  let events: Vec<Event> = events.recv_timeout(WAIT_TIMEOUT).unwrap();

  assert_eq!(
    events,
    [
      Event::InitialMetadata,
      Event::Message(b"first".to_vec()),
      Event::Message(b"second".to_vec()),
      Event::TrailingMetadata(StatusCode::Ok),
    ],
  );

  // The trailing-metadata observer ran exactly once, with OK.
  assert_eq!(*observed.lock().unwrap(), [StatusCode::Ok]);
}

#[test]
fn test_forwarded_call_without_initial_metadata() {
  let arena = make_arena();
  let inbound: CallPair = make_call_pair(client_metadata(), arena.clone());
  let outbound: CallPair = make_call_pair(client_metadata(), arena);

  let observed: Arc<Mutex<Vec<StatusCode>>> = Arc::new(Mutex::new(Vec::new()));

  {
    let observed: Arc<Mutex<Vec<StatusCode>>> = Arc::clone(&observed);

    forward_call(
      inbound.handler.start(),
      outbound.initiator.clone(),
      move |metadata: &ServerTrailingMetadata| {
        observed.lock().unwrap().push(metadata.status());
      },
    );
  }

  // A server that finishes the call without initial metadata or messages.
  {
    let server: CallHandler = outbound.handler.start();
    let respond: CallHandler = server.clone();
    let mut messages = server.pull_message();

    server.spawn(
      "trailers_only_server",
      move || {
        loop {
          match messages.poll() {
            Poll::Ready(Some(_message)) => {}
            Poll::Ready(None) => {
              respond.spawn_push_server_trailing_metadata(ServerTrailingMetadata::new(
                StatusCode::Ok,
              ));
              return Poll::Ready(());
            }
            Poll::Pending => return Poll::Pending,
          }
        }
      },
      |_| {},
    );
  }

  let events: mpsc::Receiver<Vec<Event>> = spawn_client_receiver(&inbound.initiator);

  inbound.initiator.spawn_finish_sends();

  let events: Vec<Event> = events.recv_timeout(WAIT_TIMEOUT).unwrap();

  assert_eq!(
    events,
    [Event::NoInitialMetadata, Event::TrailingMetadata(StatusCode::Ok)],
  );
  assert_eq!(*observed.lock().unwrap(), [StatusCode::Ok]);
}

#[test]
fn test_forwarded_call_cancellation() {
  let arena = make_arena();
  let inbound: CallPair = make_call_pair(client_metadata(), arena.clone());
  let outbound: CallPair = make_call_pair(client_metadata(), arena);

  let observed: Arc<Mutex<Vec<StatusCode>>> = Arc::new(Mutex::new(Vec::new()));

  {
    let observed: Arc<Mutex<Vec<StatusCode>>> = Arc::clone(&observed);

    forward_call(
      inbound.handler.start(),
      outbound.initiator.clone(),
      move |metadata: &ServerTrailingMetadata| {
        observed.lock().unwrap().push(metadata.status());
      },
    );
  }

  // No server ever responds on the outbound call.
  let _silent_server: CallHandler = outbound.handler.start();

  let events: mpsc::Receiver<Vec<Event>> = spawn_client_receiver(&inbound.initiator);

  inbound
    .initiator
    .spawn_push_message(Message::new(b"doomed".to_vec(), MessageFlags::empty()));

  outbound.initiator.cancel(StatusCode::Cancelled);

  let events: Vec<Event> = events.recv_timeout(WAIT_TIMEOUT).unwrap();

  assert_eq!(
    events.last(),
    Some(&Event::TrailingMetadata(StatusCode::Cancelled)),
  );

  // Even on cancellation the observer runs exactly once.
  assert_eq!(*observed.lock().unwrap(), [StatusCode::Cancelled]);
}

#[test]
fn test_direct_pair_round_trip() {
  let arena = make_arena();
  let pair: CallPair = make_call_pair(client_metadata(), arena);
  let server: CallHandler = pair.handler.start();

  // The server sees the client's initial metadata.
  let (path_sender, path_receiver) = mpsc::channel::<Option<String>>();
  let mut pull_initial = server.pull_client_initial_metadata();

  server.spawn(
    "read_client_metadata",
    move || pull_initial.poll(),
    move |metadata: Option<ClientMetadata>| {
      let path: Option<String> = metadata
        .as_ref()
        .and_then(|metadata| metadata.get("path"))
        .map(str::to_owned);

      path_sender.send(path).unwrap();
    },
  );

  assert_eq!(
    path_receiver.recv_timeout(WAIT_TIMEOUT).unwrap().as_deref(),
    Some("/echo.Echo/BidiEcho"),
  );

  spawn_echo_server(&server);

  let events: mpsc::Receiver<Vec<Event>> = spawn_client_receiver(&pair.initiator);

  pair
    .initiator
    .spawn_push_message(Message::new(b"ping".to_vec(), MessageFlags::empty()));
  pair.initiator.spawn_finish_sends();

  let events: Vec<Event> = events.recv_timeout(WAIT_TIMEOUT).unwrap();

  assert_eq!(
    events,
    [
      Event::InitialMetadata,
      Event::Message(b"ping".to_vec()),
      Event::TrailingMetadata(StatusCode::Ok),
    ],
  );
}
