//! The call spine: two coupled parties pumping one bidirectional call.
//!
//! A spine owns an initiator-side party, a handler-side party, and the
//! pipes between them; the [`CallInitiator`] and [`CallHandler`] handles
//! each hold only a shared reference to the spine, so the two sides never
//! reference each other directly.
//!
//! [`forward_call`] composes the two sides into a pumping call:
//!
//! - the handler side pulls inbound client messages and replays them into
//!   the initiator, finishing the initiator's sends when the source ends;
//! - the initiator side awaits server initial metadata, replays it and the
//!   server's messages into the handler, then awaits the trailing metadata,
//!   hands it to the caller's observer, and forwards it to the handler.
//!
//! Delivery order on the server-to-client direction is fixed: initial
//! metadata precedes every message, and messages precede the trailing
//! metadata. When the initial metadata is absent no messages are pumped,
//! but the trailing metadata is still forwarded. Any initiator-side failure
//! cancels the call; the synthesized trailing metadata then carries the
//! cancellation status, and the observer still runs exactly once.

use parking_lot::Mutex;
use tracing::trace;
use triomphe::Arc;

use crate::arena::ArenaRef;
use crate::call::ClientMetadata;
use crate::call::Message;
use crate::call::ServerMetadata;
use crate::call::ServerTrailingMetadata;
use crate::call::StatusCode;
use crate::consts::CAP_MESSAGE_STREAM;
use crate::engine::EngineRef;
use crate::party::Party;
use crate::promise::Next;
use crate::promise::Oneshot;
use crate::promise::Pipe;
use crate::promise::Poll;
use crate::promise::Promise;
use crate::promise::Pull;
use crate::promise::for_each;
use crate::promise::if_then;
use crate::promise::map;
use crate::promise::seq;
use crate::promise::try_seq;
use crate::sync::DualArc;

// -----------------------------------------------------------------------------
// Call Spine
// -----------------------------------------------------------------------------

struct CallSpine {
  initiator: DualArc<Party>,
  handler: DualArc<Party>,
  arena: ArenaRef,
  cancel_status: Mutex<Option<StatusCode>>,
  client_initial_metadata: Oneshot<ClientMetadata>,
  server_initial_metadata: Oneshot<ServerMetadata>,
  server_trailing_metadata: Oneshot<ServerTrailingMetadata>,
  /// Client-to-server message stream.
  client_messages: Pipe<Message>,
  /// Server-to-client message stream.
  server_messages: Pipe<Message>,
}

impl CallSpine {
  /// Tears the call down with `status`.
  ///
  /// The first cancellation wins; the trailing metadata observed by the
  /// initiator side is synthesized from its status unless the real
  /// trailing metadata arrived first.
  fn cancel(&self, status: StatusCode) {
    {
      let mut cancel_status = self.cancel_status.lock();

      if cancel_status.is_some() {
        return;
      }

      *cancel_status = Some(status);
    }

    trace!(target: "convoke", %status, "call cancelled");

    self.client_messages.close();
    self.server_messages.close();
    self.server_initial_metadata.close();
    self.server_trailing_metadata.set(ServerTrailingMetadata::new(status));
  }

  /// Delivers the server's trailing metadata, ending the call.
  ///
  /// Messages already in flight on the server-to-client stream drain
  /// before the stream reports its end, so the receiver still observes
  /// every message ahead of the trailing metadata.
  fn deliver_trailing(&self, metadata: ServerTrailingMetadata) {
    self.server_messages.finish();
    self.client_messages.close();
    self.server_initial_metadata.close();
    self.server_trailing_metadata.set(metadata);
  }

  #[inline]
  fn cancel_status(&self) -> Option<StatusCode> {
    *self.cancel_status.lock()
  }
}

// -----------------------------------------------------------------------------
// Call Initiator
// -----------------------------------------------------------------------------

/// Client-side handle to a call.
#[derive(Clone)]
pub struct CallInitiator {
  spine: Arc<CallSpine>,
}

impl CallInitiator {
  /// Returns the call's arena.
  #[inline]
  pub fn arena(&self) -> &ArenaRef {
    &self.spine.arena
  }

  /// Spawns `promise` onto the initiator-side party.
  pub fn spawn<P, F>(&self, name: &'static str, promise: P, on_done: F)
  where
    P: Promise + Send + 'static,
    P::Output: Send + 'static,
    F: FnOnce(P::Output) + Send + 'static,
  {
    self.spine.initiator.spawn(name, promise, on_done);
  }

  /// Queues a client message send on the initiator's activity.
  pub fn spawn_push_message(&self, message: Message) {
    let push = self.spine.client_messages.push(message);

    self.spawn("push_client_message", push, |_sent: bool| {});
  }

  /// Ends the client's message stream once queued sends drain.
  pub fn spawn_finish_sends(&self) {
    let pipe: Pipe<Message> = self.spine.client_messages.clone();

    self.spawn(
      "finish_client_sends",
      move || {
        pipe.finish();
        Poll::Ready(())
      },
      |_| {},
    );
  }

  /// Returns a promise yielding the server's initial metadata.
  ///
  /// Resolves `Ok(None)` when the server finished without initial
  /// metadata, and fails with the cancellation status if the call was
  /// cancelled first.
  pub fn pull_server_initial_metadata(
    &self,
  ) -> impl Promise<Output = Result<Option<ServerMetadata>, StatusCode>> + Send + 'static + use<> {
    let spine: Arc<CallSpine> = Arc::clone(&self.spine);

    map(
      self.spine.server_initial_metadata.pull(),
      move |metadata: Option<ServerMetadata>| match metadata {
        Some(metadata) => Ok(Some(metadata)),
        None => match spine.cancel_status() {
          Some(status) => Err(status),
          None => Ok(None),
        },
      },
    )
  }

  /// Returns a promise yielding the next server message.
  #[inline]
  pub fn pull_message(&self) -> Next<Message> {
    self.spine.server_messages.next()
  }

  pub(crate) fn server_messages(&self) -> Pipe<Message> {
    self.spine.server_messages.clone()
  }

  /// Returns a promise yielding the server's trailing metadata.
  ///
  /// Always resolves: a cancelled call yields trailing metadata
  /// synthesized from the cancellation status.
  pub fn pull_server_trailing_metadata(
    &self,
  ) -> impl Promise<Output = ServerTrailingMetadata> + Send + 'static + use<> {
    let spine: Arc<CallSpine> = Arc::clone(&self.spine);

    map(
      self.spine.server_trailing_metadata.pull(),
      move |metadata: Option<ServerTrailingMetadata>| {
        metadata.unwrap_or_else(|| {
          ServerTrailingMetadata::new(spine.cancel_status().unwrap_or(StatusCode::Unknown))
        })
      },
    )
  }

  /// Cancels the call with `status`.
  #[inline]
  pub fn cancel(&self, status: StatusCode) {
    self.spine.cancel(status);
  }
}

impl std::fmt::Debug for CallInitiator {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str("CallInitiator(..)")
  }
}

// -----------------------------------------------------------------------------
// Call Handler
// -----------------------------------------------------------------------------

/// Server-side handle to a call that has not started yet.
pub struct UnstartedCallHandler {
  spine: Arc<CallSpine>,
}

impl UnstartedCallHandler {
  /// Starts the call, producing the active handler handle.
  #[inline]
  pub fn start(self) -> CallHandler {
    CallHandler { spine: self.spine }
  }
}

impl std::fmt::Debug for UnstartedCallHandler {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str("UnstartedCallHandler(..)")
  }
}

/// Server-side handle to a call.
#[derive(Clone)]
pub struct CallHandler {
  spine: Arc<CallSpine>,
}

impl CallHandler {
  /// Returns the call's arena.
  #[inline]
  pub fn arena(&self) -> &ArenaRef {
    &self.spine.arena
  }

  /// Spawns `promise` onto the handler-side party.
  pub fn spawn<P, F>(&self, name: &'static str, promise: P, on_done: F)
  where
    P: Promise + Send + 'static,
    P::Output: Send + 'static,
    F: FnOnce(P::Output) + Send + 'static,
  {
    self.spine.handler.spawn(name, promise, on_done);
  }

  /// Returns a promise yielding the client's initial metadata.
  #[inline]
  pub fn pull_client_initial_metadata(&self) -> Pull<ClientMetadata> {
    self.spine.client_initial_metadata.pull()
  }

  /// Returns a promise yielding the next client message.
  #[inline]
  pub fn pull_message(&self) -> Next<Message> {
    self.spine.client_messages.next()
  }

  pub(crate) fn client_messages(&self) -> Pipe<Message> {
    self.spine.client_messages.clone()
  }

  /// Queues delivery of the server's initial metadata.
  pub fn spawn_push_server_initial_metadata(&self, metadata: ServerMetadata) {
    let oneshot: Oneshot<ServerMetadata> = self.spine.server_initial_metadata.clone();
    let mut metadata: Option<ServerMetadata> = Some(metadata);

    self.spawn(
      "push_server_initial_metadata",
      move || {
        let Some(metadata) = metadata.take() else {
          unreachable!("initial metadata pushed twice");
        };

        oneshot.set(metadata);
        Poll::Ready(())
      },
      |_| {},
    );
  }

  /// Queues a server message send on the handler's activity.
  pub fn spawn_push_message(&self, message: Message) {
    let push = self.spine.server_messages.push(message);

    self.spawn("push_server_message", push, |_sent: bool| {});
  }

  /// Queues delivery of the server's trailing metadata, ending the call.
  pub fn spawn_push_server_trailing_metadata(&self, metadata: ServerTrailingMetadata) {
    let spine: Arc<CallSpine> = Arc::clone(&self.spine);
    let mut metadata: Option<ServerTrailingMetadata> = Some(metadata);

    self.spawn(
      "push_server_trailing_metadata",
      move || {
        let Some(metadata) = metadata.take() else {
          unreachable!("trailing metadata pushed twice");
        };

        spine.deliver_trailing(metadata);
        Poll::Ready(())
      },
      |_| {},
    );
  }
}

impl std::fmt::Debug for CallHandler {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str("CallHandler(..)")
  }
}

// -----------------------------------------------------------------------------
// Construction
// -----------------------------------------------------------------------------

/// The two ends of a freshly created call.
#[derive(Debug)]
pub struct CallPair {
  /// The outward, client-facing end.
  pub initiator: CallInitiator,
  /// The server-facing end, not yet started.
  pub handler: UnstartedCallHandler,
}

/// Creates a call: an initiator handle and an unstarted handler handle
/// sharing one spine.
///
/// Both sides schedule onto `arena`, which must advertise an [`EngineRef`]
/// capability.
pub fn make_call_pair(client_initial_metadata: ClientMetadata, arena: ArenaRef) -> CallPair {
  debug_assert!(
    arena.get_context::<EngineRef>().is_some(),
    "call arena has no event engine",
  );

  let spine: Arc<CallSpine> = Arc::new(CallSpine {
    initiator: Party::new(arena.clone()),
    handler: Party::new(arena.clone()),
    arena,
    cancel_status: Mutex::new(None),
    client_initial_metadata: Oneshot::with_value(client_initial_metadata),
    server_initial_metadata: Oneshot::new(),
    server_trailing_metadata: Oneshot::new(),
    client_messages: Pipe::new(CAP_MESSAGE_STREAM),
    server_messages: Pipe::new(CAP_MESSAGE_STREAM),
  });

  CallPair {
    initiator: CallInitiator {
      spine: Arc::clone(&spine),
    },
    handler: UnstartedCallHandler { spine },
  }
}

// -----------------------------------------------------------------------------
// Forwarding
// -----------------------------------------------------------------------------

/// Composes a handler and an initiator into a bidirectional pumping call.
///
/// `on_server_trailing_metadata` observes the final trailing metadata
/// exactly once, before it is forwarded to the handler side, even when the
/// call is cancelled.
pub fn forward_call<F>(
  handler: CallHandler,
  initiator: CallInitiator,
  on_server_trailing_metadata: F,
) where
  F: FnOnce(&ServerTrailingMetadata) + Send + 'static,
{
  // Client-to-server direction: replay the handler's inbound messages into
  // the initiator, then tell it no more sends are coming.
  {
    let source: Pipe<Message> = handler.client_messages();
    let push_target: CallInitiator = initiator.clone();
    let finish_target: CallInitiator = initiator.clone();

    handler.spawn(
      "read_messages",
      seq(
        for_each(source, move |message: Message| {
          // Delivery has to happen on the target call's own activity.
          push_target.spawn_push_message(message);
          || Poll::Ready(Ok::<(), StatusCode>(()))
        }),
        move |_result: Result<(), StatusCode>| {
          finish_target.spawn_finish_sends();
          || Poll::Ready(())
        },
      ),
      |_| {},
    );
  }

  // Server-to-client direction: initial metadata, then messages, then the
  // trailing metadata through the observer.
  {
    let pump_handler: CallHandler = handler.clone();
    let pump_initiator: CallInitiator = initiator.clone();
    let cancel_target: CallInitiator = initiator.clone();
    let trailing_handler: CallHandler = handler.clone();
    let trailing_initiator: CallInitiator = initiator.clone();

    let head = try_seq(
      initiator.pull_server_initial_metadata(),
      move |metadata: Option<ServerMetadata>| {
        let has_metadata: bool = metadata.is_some();

        if_then(
          has_metadata,
          move || {
            let Some(metadata) = metadata else {
              unreachable!("selected the metadata branch without metadata");
            };

            pump_handler.spawn_push_server_initial_metadata(metadata);

            let push_handler: CallHandler = pump_handler.clone();

            for_each(pump_initiator.server_messages(), move |message: Message| {
              push_handler.spawn_push_message(message);
              || Poll::Ready(Ok::<(), StatusCode>(()))
            })
          },
          || || Poll::Ready(Ok::<(), StatusCode>(())),
        )
      },
    );

    let guarded = map(head, move |result: Result<(), StatusCode>| {
      if let Err(status) = result {
        cancel_target.cancel(status);
      }
    });

    let pump = seq(guarded, move |()| {
      seq(
        trailing_initiator.pull_server_trailing_metadata(),
        move |metadata: ServerTrailingMetadata| {
          on_server_trailing_metadata(&metadata);
          trailing_handler.spawn_push_server_trailing_metadata(metadata);
          || Poll::Ready(())
        },
      )
    });

    initiator.spawn("read_the_things", pump, |_| {});
  }
}
