use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;

use space_scene::offload::{Ack, Command, CorrelationToken, Envelope, OffloadChannel, Reply};
use space_scene::rendering::ImageChunk;
use space_scene::scene::Scene;
use space_scene::{
    Error, Executor, ExecutorKind, RenderConfig, RenderOutcome, RenderRequest, StarfieldRenderer,
    Surface, SurfaceRenderer,
};

/// A channel whose background side is driven by the test.
fn scripted_channel(timeout: Duration) -> (OffloadChannel, mpsc::UnboundedReceiver<Envelope>, std_mpsc::Sender<Reply>) {
    let (outbound, commands) = mpsc::unbounded_channel();
    let (replies, inbound) = std_mpsc::channel();
    let channel = OffloadChannel::connect(outbound, inbound, timeout).unwrap();
    (channel, commands, replies)
}

fn ack(replies: &std_mpsc::Sender<Reply>, token: CorrelationToken, result: space_scene::Result<Ack>) {
    replies.send(Reply { token, result }).unwrap();
}

#[tokio::test]
async fn out_of_order_replies_reach_their_callers() {
    const RENDERS: u32 = 6;
    let (channel, mut commands, replies) = scripted_channel(Duration::from_secs(10));
    channel.bind(Surface::new(8, 8).unwrap()).unwrap();

    let background = thread::spawn(move || {
        let mut held = Vec::new();
        while let Some(Envelope { token, command }) = commands.blocking_recv() {
            match command {
                Command::TransferSurface(_) => ack(&replies, token, Ok(Ack::SurfaceReceived)),
                Command::Render(request) => {
                    held.push((token, request));
                    if held.len() == RENDERS as usize {
                        break;
                    }
                }
                other => panic!("unexpected {}", other.name()),
            }
        }
        // a stray reply nobody asked for
        ack(&replies, CorrelationToken::from(9_999), Ok(Ack::Resized));
        // answer in reverse, echoing each request's width as the tile count
        for (token, request) in held.into_iter().rev() {
            let outcome = RenderOutcome::Completed {
                tiles: request.width as usize,
            };
            ack(&replies, token, Ok(Ack::RenderComplete(outcome)));
        }
    });

    let requests: Vec<RenderRequest> = (1..=RENDERS)
        .map(|i| RenderRequest::new(format!("seed-{}", i), i * 10, 8))
        .collect();
    let outcomes = join_all(requests.iter().map(|r| channel.render(r))).await;

    for (request, outcome) in requests.iter().zip(outcomes) {
        assert_eq!(outcome.unwrap().tiles(), request.width as usize);
    }
    assert_eq!(channel.pending_requests(), 0);
    assert!(channel.is_transferred());
    background.join().unwrap();
}

#[tokio::test]
async fn untransferred_surface_resizes_locally() {
    let (channel, mut commands, _replies) = scripted_channel(Duration::from_secs(10));
    channel.bind(Surface::new(8, 8).unwrap()).unwrap();

    channel.resize(20, 10).await.unwrap();
    assert_eq!(channel.dimensions().unwrap(), (20, 10));
    assert!(commands.try_recv().is_err());

    let snapshot = channel.snapshot().await.unwrap();
    assert_eq!((snapshot.width(), snapshot.height()), (20, 10));
}

#[tokio::test]
async fn transferred_surface_resizes_by_request() {
    let (channel, mut commands, replies) = scripted_channel(Duration::from_secs(10));
    channel.bind(Surface::new(8, 8).unwrap()).unwrap();

    let background = thread::spawn(move || {
        let mut seen = Vec::new();
        while let Some(Envelope { token, command }) = commands.blocking_recv() {
            seen.push(command.name());
            let result = match command {
                Command::TransferSurface(_) => Ok(Ack::SurfaceReceived),
                Command::Resize { width: 30, height: 15 } => Ok(Ack::Resized),
                other => Err(Error::SurfaceUnavailable(format!("unexpected {}", other.name()))),
            };
            ack(&replies, token, result);
        }
        seen
    });

    channel.transfer_surface().await.unwrap();
    channel.resize(30, 15).await.unwrap();
    assert_eq!(channel.dimensions().unwrap(), (30, 15));

    channel.close().await;
    assert_eq!(background.join().unwrap(), vec!["transfer-surface", "resize"]);
}

#[tokio::test]
async fn surface_transfers_only_once() {
    let (channel, mut commands, replies) = scripted_channel(Duration::from_secs(10));
    channel.bind(Surface::new(8, 8).unwrap()).unwrap();

    let background = thread::spawn(move || {
        let mut transfers = 0;
        while let Some(Envelope { token, command }) = commands.blocking_recv() {
            if let Command::TransferSurface(_) = command {
                transfers += 1;
            }
            ack(&replies, token, Ok(Ack::SurfaceReceived));
        }
        transfers
    });

    channel.transfer_surface().await.unwrap();
    assert!(matches!(
        channel.transfer_surface().await,
        Err(Error::SurfaceTransferred)
    ));
    // a second surface cannot be bound either
    let rejected = channel.bind(Surface::new(4, 4).unwrap()).unwrap_err();
    assert_eq!(rejected.width(), 4);

    channel.close().await;
    assert_eq!(background.join().unwrap(), 1);
}

#[tokio::test]
async fn disconnect_fails_waiters_with_offload_lost() {
    let (channel, mut commands, replies) = scripted_channel(Duration::from_secs(10));
    channel.bind(Surface::new(8, 8).unwrap()).unwrap();

    thread::spawn(move || {
        while let Some(Envelope { token, command }) = commands.blocking_recv() {
            match command {
                Command::TransferSurface(_) => ack(&replies, token, Ok(Ack::SurfaceReceived)),
                // die mid-render, dropping the reply side
                _ => return,
            }
        }
    });

    let err = channel
        .render(&RenderRequest::new("abc123", 8, 8))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::OffloadLost(_)));
    assert!(channel.is_lost());

    let err = channel
        .render(&RenderRequest::new("abc123", 8, 8))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::OffloadLost(_)));
}

#[tokio::test]
async fn silent_background_times_out() {
    let (channel, _commands, _replies) = scripted_channel(Duration::from_millis(50));

    let err = channel.init().await.unwrap_err();
    assert!(matches!(err, Error::OffloadLost(_)));
    assert!(channel.is_lost());
    assert_eq!(channel.pending_requests(), 0);
}

#[tokio::test]
async fn long_render_survives_while_pings_are_answered() {
    let (channel, mut commands, replies) = scripted_channel(Duration::from_millis(50));
    channel.bind(Surface::new(8, 8).unwrap()).unwrap();

    let background = thread::spawn(move || {
        let mut pings = 0;
        let mut render = None;
        while let Some(Envelope { token, command }) = commands.blocking_recv() {
            match command {
                Command::TransferSurface(_) => ack(&replies, token, Ok(Ack::SurfaceReceived)),
                Command::Render(_) => render = Some(token),
                Command::Ping => {
                    pings += 1;
                    ack(&replies, token, Ok(Ack::Pong));
                    if pings == 3 {
                        let done = RenderOutcome::Completed { tiles: 1 };
                        ack(&replies, render.unwrap(), Ok(Ack::RenderComplete(done)));
                    }
                }
                other => panic!("unexpected {}", other.name()),
            }
        }
        pings
    });

    let outcome = channel
        .render(&RenderRequest::new("abc123", 8, 8))
        .await
        .unwrap();
    assert_eq!(outcome, RenderOutcome::Completed { tiles: 1 });
    assert!(!channel.is_lost());

    channel.close().await;
    assert_eq!(background.join().unwrap(), 3);
}

#[tokio::test]
async fn stalled_render_is_lost_when_pings_go_unanswered() {
    let (channel, mut commands, replies) = scripted_channel(Duration::from_millis(50));
    channel.bind(Surface::new(8, 8).unwrap()).unwrap();

    let background = thread::spawn(move || {
        while let Some(Envelope { token, command }) = commands.blocking_recv() {
            if let Command::TransferSurface(_) = command {
                ack(&replies, token, Ok(Ack::SurfaceReceived));
            }
        }
    });

    let err = channel
        .render(&RenderRequest::new("abc123", 8, 8))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::OffloadLost(_)));
    assert!(channel.is_lost());
    assert_eq!(channel.pending_requests(), 0);

    channel.close().await;
    background.join().unwrap();
}

#[tokio::test]
async fn dropping_a_channel_does_not_wait_for_a_hung_background() {
    let (channel, mut commands, _replies) = scripted_channel(Duration::from_millis(50));
    let (release, hold) = std_mpsc::channel::<()>();

    let background = thread::spawn(move || {
        let first = commands.blocking_recv().map(|e| e.command.name());
        // hung until the test lets go
        let _ = hold.recv();
        first
    });

    assert!(matches!(channel.init().await, Err(Error::OffloadLost(_))));
    drop(channel);

    release.send(()).unwrap();
    assert_eq!(background.join().unwrap(), Some("init"));
}

#[tokio::test]
async fn render_without_a_surface_is_rejected() {
    let (channel, _commands, _replies) = scripted_channel(Duration::from_secs(10));
    let err = channel
        .render(&RenderRequest::new("abc123", 8, 8))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SurfaceUnavailable(_)));
}

fn worker_config() -> RenderConfig {
    RenderConfig {
        chunk_size: 32,
        offload_timeout_ms: 60_000,
        ..Default::default()
    }
}

#[tokio::test]
async fn offloaded_render_matches_in_process_render() {
    let config = worker_config();
    let request = RenderRequest::new("abc123", 96, 64);

    let offloaded = Executor::probe(
        Surface::new(96, 64).unwrap(),
        Arc::new(StarfieldRenderer::new()),
        &config,
    )
    .await;
    assert_eq!(offloaded.kind(), ExecutorKind::Offload);
    let outcome = offloaded.render(&request).await.unwrap();
    assert_eq!(outcome, RenderOutcome::Completed { tiles: 6 });
    let remote = offloaded.snapshot().await.unwrap();
    offloaded.close().await;

    let local = Executor::in_process(
        Surface::new(96, 64).unwrap(),
        Arc::new(StarfieldRenderer::new()),
        &config,
    );
    local.render(&request).await.unwrap();
    let local = local.snapshot().await.unwrap();

    assert!(!remote.is_blank());
    assert_eq!(remote.digest(), local.digest());
}

/// Sleeps on every tile so a render takes several timeout periods.
struct Sluggish;

impl SurfaceRenderer for Sluggish {
    fn render_chunk(&self, w: u32, h: u32, _: &Scene, _: [f64; 2]) -> space_scene::Result<ImageChunk> {
        thread::sleep(Duration::from_millis(40));
        Ok(ImageChunk::filled(w, h, [5, 6, 7, 255]))
    }
}

#[tokio::test]
async fn worker_render_may_outlast_the_reply_timeout() {
    let config = RenderConfig {
        chunk_size: 16,
        offload_timeout_ms: 150,
        ..Default::default()
    };
    let channel = OffloadChannel::spawn_worker(Arc::new(Sluggish), &config).unwrap();
    channel.init().await.unwrap();
    channel.bind(Surface::new(64, 64).unwrap()).unwrap();

    // 16 tiles at 40ms each, several times the timeout
    let outcome = channel
        .render(&RenderRequest::new("abc123", 64, 64))
        .await
        .unwrap();
    assert_eq!(outcome, RenderOutcome::Completed { tiles: 16 });
    assert!(!channel.is_lost());
    channel.init().await.unwrap();

    let surface = channel.snapshot().await.unwrap();
    assert_eq!(surface.pixel(0, 0), Some([5, 6, 7, 255]));
    channel.close().await;
}

#[tokio::test]
async fn worker_supersedes_earlier_renders() {
    let config = worker_config();
    let channel = OffloadChannel::spawn_worker(Arc::new(StarfieldRenderer::new()), &config).unwrap();
    channel.init().await.unwrap();
    channel.bind(Surface::new(128, 128).unwrap()).unwrap();
    channel.transfer_surface().await.unwrap();

    let first = RenderRequest::new("first", 128, 128);
    let second = RenderRequest::new("second", 128, 128);
    let (a, b) = futures::join!(channel.render(&first), channel.render(&second));
    assert!(a.unwrap().is_superseded());
    assert_eq!(b.unwrap(), RenderOutcome::Completed { tiles: 16 });

    let after_both = channel.snapshot().await.unwrap();
    channel.render(&second).await.unwrap();
    let second_alone = channel.snapshot().await.unwrap();
    assert_eq!(after_both.digest(), second_alone.digest());

    // a surface smuggled in through the raw protocol is refused
    let err = channel
        .request(Command::TransferSurface(Surface::new(4, 4).unwrap()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SurfaceTransferred));
    channel.close().await;
}

#[tokio::test]
async fn worker_resize_is_forwarded() {
    let config = worker_config();
    let exec = Executor::probe(
        Surface::new(64, 64).unwrap(),
        Arc::new(StarfieldRenderer::new()),
        &config,
    )
    .await;
    exec.render(&RenderRequest::new("abc123", 64, 64)).await.unwrap();

    let layout = exec.resize(2560, 720).await.unwrap();
    assert_eq!((layout.width, layout.height), (1280.0, 360.0));
    let surface = exec.snapshot().await.unwrap();
    assert_eq!((surface.width(), surface.height()), (2560, 720));
    assert!(surface.is_blank());
    exec.close().await;
}
