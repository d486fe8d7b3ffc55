use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bling_core::{
    Color, Command, CommandKind, CommandListener, DeviceError, JobState, JobSupervisor,
    MemoryStrip, MemoryTable, ParamDefaults, PixelDevice, SharedTable, SupervisorSettings,
    TableKeys, TableValue, PROCESSED, RECEIVED,
};

async fn within<T>(what: &str, fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", what))
}

fn supervisor(strip: &MemoryStrip) -> JobSupervisor {
    JobSupervisor::new(Box::new(strip.clone()), SupervisorSettings::default())
}

#[tokio::test]
async fn solid_hold_runs_until_cancelled() {
    let strip = MemoryStrip::new(8);
    let sup = supervisor(&strip);
    let command = Command::new(CommandKind::SolidColor)
        .color((10, 20, 30))
        .repeat(1)
        .wait_ms(0)
        .brightness(64);

    sup.submit(command).await.release();
    within("first frame", strip.wait_for_commits(1)).await;

    let frame = strip.last_frame().unwrap();
    assert!(frame.is_filled_with(Color::new(10, 20, 30)));
    assert_eq!(frame.brightness, 64);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sup.current().await.unwrap().state, JobState::Running);
    assert_eq!(strip.commit_count(), 1);

    let started = std::time::Instant::now();
    within("cancel", sup.cancel()).await;
    assert!(started.elapsed() < bling_core::HOLD_POLL_INTERVAL);
    assert!(strip.last_frame().unwrap().is_dark());
    assert!(sup.current().await.is_none());
}

#[tokio::test]
async fn color_wipe_lights_one_more_pixel_per_commit() {
    let strip = MemoryStrip::new(10);
    let sup = supervisor(&strip);
    let command = Command::new(CommandKind::ColorWipe)
        .color((255, 0, 0))
        .repeat(1)
        .wait_ms(5);

    sup.submit(command).await.release();
    within("wipe", strip.wait_for_commits(11)).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    let frames = strip.frames();
    assert_eq!(frames.len(), 11);
    let red = Color::new(255, 0, 0);
    for (n, frame) in frames[..10].iter().enumerate() {
        assert_eq!(frame.lit(), n + 1);
        assert!(frame.pixels[..=n].iter().all(|p| *p == red));
    }
    assert!(frames[10].is_dark());
    assert!(sup.current().await.is_none());
}

#[tokio::test]
async fn preempted_animation_leaves_strip_dark() {
    let kinds = [
        Command::new(CommandKind::SolidColor).wait_ms(0),
        Command::new(CommandKind::SolidColor).wait_ms(10_000),
        Command::new(CommandKind::Blink).repeat(100).wait_ms(20),
        Command::new(CommandKind::ColorWipe).repeat(100).wait_ms(20),
        Command::new(CommandKind::TheaterChase).repeat(100).wait_ms(20),
        Command::new(CommandKind::Rainbow).repeat(100).wait_ms(20),
        Command::new(CommandKind::RainbowCycle).repeat(100).wait_ms(20),
        Command::new(CommandKind::TheaterChaseRainbow).repeat(100).wait_ms(20),
    ];
    let next = Color::new(0, 0, 77);

    for first in kinds {
        let strip = MemoryStrip::new(6);
        let sup = supervisor(&strip);

        sup.submit(first.clone()).await.release();
        within("first animation", strip.wait_for_commits(1)).await;

        let gate = within(
            "preemption",
            sup.submit(Command::new(CommandKind::SolidColor).color(next).wait_ms(0)),
        )
        .await;
        let before = strip.commit_count();
        assert!(
            strip.last_frame().unwrap().is_dark(),
            "{} was not cleared",
            first.kind
        );

        gate.release();
        within("second animation", strip.wait_for_commits(before + 1)).await;
        assert!(strip.frames()[before].is_filled_with(next));

        sup.shutdown().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_never_interleave() {
    let strip = MemoryStrip::new(5);
    let sup = Arc::new(supervisor(&strip));

    let mut tasks = Vec::new();
    for k in 1..=8u8 {
        let sup = sup.clone();
        tasks.push(tokio::spawn(async move {
            let command = Command::new(CommandKind::ColorWipe)
                .color((k, 0, 0))
                .repeat(1000)
                .wait_ms(1);
            sup.submit(command).await.release();
        }));
    }
    for task in tasks {
        within("submit", task).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(30)).await;
    sup.shutdown().await;

    // Every lit frame shows one job's color, and once a job's color has been
    // replaced it never comes back.
    let mut finished: Vec<Color> = Vec::new();
    let mut current: Option<Color> = None;
    for frame in strip.frames() {
        let lit: Vec<Color> = frame.pixels.iter().copied().filter(|p| !p.is_off()).collect();
        let Some(color) = lit.first().copied() else {
            continue;
        };
        assert!(lit.iter().all(|p| *p == color), "mixed frame {:?}", frame);
        if current != Some(color) {
            assert!(!finished.contains(&color), "{:?} came back", color);
            if let Some(previous) = current.replace(color) {
                finished.push(previous);
            }
        }
    }
    assert!(strip.last_frame().unwrap().is_dark());
}

/// Strip that records the status key the first time a frame is committed.
struct AckRecorder {
    table: Arc<MemoryTable>,
    status_at_first_commit: Arc<parking_lot::Mutex<Option<Vec<TableValue>>>>,
    pixels: usize,
}

impl PixelDevice for AckRecorder {
    fn num_pixels(&self) -> usize {
        self.pixels
    }

    fn set_pixel_color(&mut self, _index: usize, _color: Color) -> Result<(), DeviceError> {
        Ok(())
    }

    fn set_brightness(&mut self, _level: u8) -> Result<(), DeviceError> {
        Ok(())
    }

    fn show(&mut self) -> Result<(), DeviceError> {
        let mut seen = self.status_at_first_commit.lock();
        if seen.is_none() {
            *seen = Some(self.table.history_of("command_status"));
        }
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn processed_is_published_before_first_frame() {
    let table = Arc::new(MemoryTable::new());
    let seen = Arc::new(parking_lot::Mutex::new(None));
    let recorder = AckRecorder {
        table: table.clone(),
        status_at_first_commit: seen.clone(),
        pixels: 4,
    };
    let sup = Arc::new(JobSupervisor::new(
        Box::new(recorder),
        SupervisorSettings::default(),
    ));
    let listener = CommandListener::new(
        table.clone(),
        sup.clone(),
        TableKeys::default(),
        ParamDefaults::default(),
    );

    listener.handle_change(&TableValue::from("solid")).await;
    within("first frame", async {
        while seen.lock().is_none() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;

    assert_eq!(
        seen.lock().clone().unwrap(),
        vec![TableValue::from(RECEIVED), TableValue::from(PROCESSED)]
    );
    sup.shutdown().await;
}

#[tokio::test]
async fn listener_drives_strip_from_table_changes() {
    let table = Arc::new(MemoryTable::new());
    let strip = MemoryStrip::new(6);
    let sup = Arc::new(supervisor(&strip));
    let listener = CommandListener::new(
        table.clone(),
        sup.clone(),
        TableKeys::default(),
        ParamDefaults::default(),
    );
    let task = bling_core::listener::spawn(listener, table.subscribe());

    table.set_connected(true);
    table.put("red", TableValue::Number(255.0)).unwrap();
    table.put("green", TableValue::from("oops")).unwrap();
    table.put("blue", TableValue::Number(12.9)).unwrap();
    table.put("wait_ms", TableValue::Number(0.0)).unwrap();
    table.put_string("command", "solid").unwrap();

    within("solid frame", strip.wait_for_commits(1)).await;
    let frame = strip.last_frame().unwrap();
    assert!(frame.is_filled_with(Color::new(255, 32, 12)));
    assert_eq!(frame.brightness, 64);

    table.put_string("command", "clear").unwrap();
    within("clear", async {
        while table.history_of("command_status").len() < 4 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    within("dark strip", strip.wait_for_commits(3)).await;
    assert!(strip.last_frame().unwrap().is_dark());

    assert_eq!(
        table.history_of("command_status"),
        vec![
            TableValue::from(RECEIVED),
            TableValue::from(PROCESSED),
            TableValue::from(RECEIVED),
            TableValue::from(PROCESSED),
        ]
    );

    task.abort();
}

/// Strip whose `stall_on`-th commit blocks inside the device call.
struct StallingStrip {
    inner: MemoryStrip,
    shows: usize,
    stall_on: usize,
    stall: Duration,
    stalled: Arc<tokio::sync::Notify>,
}

impl PixelDevice for StallingStrip {
    fn num_pixels(&self) -> usize {
        self.inner.num_pixels()
    }

    fn set_pixel_color(&mut self, index: usize, color: Color) -> Result<(), DeviceError> {
        self.inner.set_pixel_color(index, color)
    }

    fn set_brightness(&mut self, level: u8) -> Result<(), DeviceError> {
        self.inner.set_brightness(level)
    }

    fn show(&mut self) -> Result<(), DeviceError> {
        self.shows += 1;
        if self.shows == self.stall_on {
            self.stalled.notify_one();
            std::thread::sleep(self.stall);
        }
        self.inner.show()
    }
}

/// Supervisor over a strip whose second commit hangs, with a Blink job
/// already stuck in that commit.
async fn supervisor_stuck_in_device_call(strip: &MemoryStrip) -> JobSupervisor {
    let stalled = Arc::new(tokio::sync::Notify::new());
    let device = StallingStrip {
        inner: strip.clone(),
        shows: 0,
        stall_on: 2,
        stall: Duration::from_millis(1500),
        stalled: stalled.clone(),
    };
    let sup = JobSupervisor::new(
        Box::new(device),
        SupervisorSettings {
            cancel_timeout: Some(Duration::from_millis(50)),
        },
    );

    let blink = Command::new(CommandKind::Blink)
        .color((9, 9, 9))
        .repeat(100)
        .wait_ms(10);
    sup.submit(blink).await.release();
    within("device call to hang", stalled.notified()).await;
    sup
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn submit_is_bounded_while_device_call_hangs() {
    let strip = MemoryStrip::new(4);
    let sup = supervisor_stuck_in_device_call(&strip).await;
    let green = Color::new(0, 200, 0);

    let started = std::time::Instant::now();
    let gate = sup
        .submit(Command::new(CommandKind::SolidColor).color(green).wait_ms(0))
        .await;
    assert!(
        started.elapsed() < Duration::from_millis(500),
        "submit took {:?}",
        started.elapsed()
    );
    gate.release();

    within("new job to draw", async {
        while !strip.last_frame().is_some_and(|f| f.is_filled_with(green)) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    // Nothing but dark frames between the stuck job and the new one
    let frames = strip.frames();
    let first_green = frames.iter().position(|f| f.is_filled_with(green)).unwrap();
    assert!(first_green >= 2);
    assert!(frames[1..first_green].iter().all(|f| f.is_dark()));
    assert!(frames[first_green..].iter().all(|f| f.is_filled_with(green)));

    within("cancel", sup.cancel()).await;
    assert!(strip.last_frame().unwrap().is_dark());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_is_bounded_and_strip_ends_dark_while_device_call_hangs() {
    let strip = MemoryStrip::new(4);
    let sup = supervisor_stuck_in_device_call(&strip).await;

    let started = std::time::Instant::now();
    assert!(sup.cancel().await.is_some());
    assert!(
        started.elapsed() < Duration::from_millis(500),
        "cancel took {:?}",
        started.elapsed()
    );

    // the hung commit, then the clears once the job lets go
    within("strip to be cleared", strip.wait_for_commits(3)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(strip.last_frame().unwrap().is_dark());
    assert!(sup.current().await.is_none());

    within("shutdown", sup.shutdown()).await;
    assert!(strip.last_frame().unwrap().is_dark());
}
