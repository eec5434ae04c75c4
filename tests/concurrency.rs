//! Concurrent registration against lock-free dispatch.

mod common;

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::Duration;

use common::{context, recorded, servlet};
use whiteboard_router::error::BoxError;
use whiteboard_router::handler::HandlerState;
use whiteboard_router::{DispatcherType, Handler, HandlerInfo, Lifecycle, Whiteboard};

const WRITERS: usize = 8;
const PER_WRITER: usize = 50;

#[test]
fn test_concurrent_registration_never_exposes_uninitialized_handlers() {
    let whiteboard = Arc::new(Whiteboard::default());
    whiteboard.add_context(context(1, "/app", 0)).unwrap();

    let mut ids: Vec<usize> = (0..WRITERS * PER_WRITER).collect();
    fastrand::shuffle(&mut ids);

    let done = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let whiteboard = whiteboard.clone();
            let done = done.clone();
            thread::spawn(move || {
                let mut seen = 0usize;
                while !done.load(Ordering::Acquire) {
                    let n = fastrand::usize(0..WRITERS * PER_WRITER);
                    let path = format!("/app/s{}", n);
                    if let Some(found) = whiteboard.dispatch(&path) {
                        assert_eq!(found.handler.state(), HandlerState::Initialized);
                        assert_eq!(found.handler.id(), n as i64 + 1);
                        seen += 1;
                    }
                    assert!(whiteboard.servlets().snapshot().contexts().len() >= 2);
                }
                seen
            })
        })
        .collect();

    let writers: Vec<_> = ids
        .chunks(PER_WRITER)
        .map(|chunk| {
            let whiteboard = whiteboard.clone();
            let chunk = chunk.to_vec();
            thread::spawn(move || {
                for n in chunk {
                    let pattern = format!("/s{}", n);
                    let (handler, _) = recorded(servlet(n as i64 + 1, 1, 0, &[pattern.as_str()]));
                    whiteboard.add_servlet(handler).unwrap();
                }
            })
        })
        .collect();

    for writer in writers {
        writer.join().unwrap();
    }
    done.store(true, Ordering::Release);
    for reader in readers {
        reader.join().unwrap();
    }

    for n in 0..WRITERS * PER_WRITER {
        let found = whiteboard.dispatch(&format!("/app/s{}", n)).unwrap();
        assert_eq!(found.handler.id(), n as i64 + 1);
    }
    assert_eq!(
        whiteboard.servlets().snapshot().route_count(),
        WRITERS * PER_WRITER
    );
}

#[test]
fn test_competing_registrations_leave_one_active_per_route() {
    let whiteboard = Arc::new(Whiteboard::default());
    let recordings: Vec<_> = (0..WRITERS)
        .map(|w| {
            let whiteboard = whiteboard.clone();
            thread::spawn(move || {
                let mut recordings = Vec::new();
                for i in 0..PER_WRITER {
                    let id = (w * PER_WRITER + i) as i64 + 1;
                    let ranking = fastrand::i32(0..10);
                    let (handler, recording) = recorded(servlet(id, 0, ranking, &["/shared"]));
                    whiteboard.add_servlet(handler).unwrap();
                    recordings.push((id, ranking, recording));
                }
                recordings
            })
        })
        .flat_map(|writer| writer.join().unwrap())
        .collect();

    let expected = recordings
        .iter()
        .map(|(id, ranking, _)| (std::cmp::Reverse(*ranking), *id))
        .min()
        .map(|(_, id)| id);
    assert_eq!(whiteboard.dispatch("/shared").map(|m| m.handler.id()), expected);

    let runtime = whiteboard.runtime();
    let serving: usize = runtime.contexts.iter().map(|c| c.servlets.len()).sum();
    assert_eq!(serving, 1);

    whiteboard.shutdown().unwrap();
    for (_, _, recording) in &recordings {
        assert_eq!(recording.inits(), recording.destroys());
    }
}

#[test]
fn test_filters_registered_concurrently_all_join_the_chain() {
    let whiteboard = Arc::new(Whiteboard::default());
    let (target, _) = recorded(servlet(1, 0, 0, &["/*"]));
    whiteboard.add_servlet(target).unwrap();

    let writers: Vec<_> = (0..WRITERS)
        .map(|w| {
            let whiteboard = whiteboard.clone();
            thread::spawn(move || {
                let id = 100 + w as i64;
                let (filter, _) = recorded(HandlerInfo::new(id).with_pattern("/*"));
                whiteboard.add_filter(filter).unwrap();
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    let route = whiteboard.route("/x", DispatcherType::Request).unwrap();
    let ids: Vec<i64> = route.filters.iter().map(|f| f.id()).collect();
    assert_eq!(ids, (100..100 + WRITERS as i64).collect::<Vec<_>>());
}

/// Registers `next` into the whiteboard from its own `init`, optionally
/// after meeting another initializer at a barrier.
struct Registering {
    whiteboard: Arc<Whiteboard>,
    barrier: Option<Arc<Barrier>>,
    next: Arc<Handler>,
    as_filter: bool,
}

impl Lifecycle for Registering {
    fn init(&self, _info: &HandlerInfo) -> Result<(), BoxError> {
        if let Some(barrier) = &self.barrier {
            barrier.wait();
        }
        if self.as_filter {
            self.whiteboard.add_filter(self.next.clone())?;
        } else {
            self.whiteboard.add_servlet(self.next.clone())?;
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn registering(
    info: HandlerInfo,
    whiteboard: &Arc<Whiteboard>,
    barrier: Option<Arc<Barrier>>,
    next: Arc<Handler>,
    as_filter: bool,
) -> Arc<Handler> {
    let instance = Registering {
        whiteboard: whiteboard.clone(),
        barrier,
        next,
        as_filter,
    };
    Arc::new(Handler::new(info, Arc::new(instance)))
}

#[test]
fn test_inits_registering_across_registries_both_complete() {
    let whiteboard = Arc::new(Whiteboard::default());
    whiteboard.add_context(context(1, "/app", 0)).unwrap();
    let barrier = Arc::new(Barrier::new(2));

    // Servlet init adds a filter; filter init adds a servlet. Both inits
    // are inside their registration when the other one starts.
    let (inner_filter, filter_recording) = recorded(HandlerInfo::new(21).with_context(1).with_pattern("/*"));
    let (inner_servlet, servlet_recording) = recorded(servlet(11, 1, 0, &["/inner"]));
    let outer_servlet = registering(
        servlet(10, 1, 0, &["/outer"]),
        &whiteboard,
        Some(barrier.clone()),
        inner_filter,
        true,
    );
    let outer_filter = registering(
        HandlerInfo::new(20).with_context(1).with_pattern("/*"),
        &whiteboard,
        Some(barrier),
        inner_servlet,
        false,
    );

    let (done_tx, done_rx) = mpsc::channel();
    for (handler, as_filter) in [(outer_servlet, false), (outer_filter, true)] {
        let whiteboard = whiteboard.clone();
        let done_tx = done_tx.clone();
        thread::spawn(move || {
            let result = if as_filter {
                whiteboard.add_filter(handler)
            } else {
                whiteboard.add_servlet(handler)
            };
            done_tx.send(result.map_err(|e| e.to_string())).unwrap();
        });
    }
    for _ in 0..2 {
        let result = done_rx
            .recv_timeout(Duration::from_secs(10))
            .expect("registration did not complete");
        assert_eq!(result, Ok(()));
    }

    assert_eq!(whiteboard.dispatch("/app/outer").map(|m| m.handler.id()), Some(10));
    assert_eq!(whiteboard.dispatch("/app/inner").map(|m| m.handler.id()), Some(11));
    let route = whiteboard.route("/app/inner", DispatcherType::Request).unwrap();
    assert_eq!(
        route.filters.iter().map(|f| f.id()).collect::<Vec<_>>(),
        vec![20, 21]
    );
    assert_eq!(filter_recording.inits(), 1);
    assert_eq!(servlet_recording.inits(), 1);

    whiteboard.shutdown().unwrap();
    assert_eq!(filter_recording.destroys(), 1);
    assert_eq!(servlet_recording.destroys(), 1);
}

#[test]
fn test_servlet_init_may_register_another_servlet() {
    let whiteboard = Arc::new(Whiteboard::default());
    let (inner, recording) = recorded(servlet(2, 0, 0, &["/inner"]));
    let outer = registering(servlet(1, 0, 0, &["/outer"]), &whiteboard, None, inner, false);

    let (done_tx, done_rx) = mpsc::channel();
    {
        let whiteboard = whiteboard.clone();
        thread::spawn(move || {
            done_tx
                .send(whiteboard.add_servlet(outer).map_err(|e| e.to_string()))
                .unwrap();
        });
    }
    let result = done_rx
        .recv_timeout(Duration::from_secs(10))
        .expect("registration did not complete");
    assert_eq!(result, Ok(()));

    assert_eq!(whiteboard.dispatch("/outer").map(|m| m.handler.id()), Some(1));
    assert_eq!(whiteboard.dispatch("/inner").map(|m| m.handler.id()), Some(2));
    assert_eq!(recording.inits(), 1);

    whiteboard.shutdown().unwrap();
    assert_eq!(recording.destroys(), 1);
}
