//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio::{task, time};
use tracing::{Instrument, error};

/// A handle which can be used to manipulate the task created by
/// [`Task::spawn`].
///
/// Dropping this handle cancels the task unless [`Task::detach`] was called.
#[derive(Debug)]
pub struct Task<T> {
    join_handle: task::JoinHandle<T>,
    detached: bool,
}

/// A handle to a one-shot timer created by [`TimeoutTask::new`].
///
/// Dropping this handle cancels the timer.
#[derive(Debug)]
pub struct TimeoutTask {
    #[cfg(not(feature = "testing"))]
    _task: Task<()>,
    #[cfg(not(feature = "testing"))]
    control: UnboundedSender<TimerMessage>,
}

/// A handle to a periodic timer created by [`IntervalTask::new`].
///
/// Dropping this handle cancels the timer.
#[derive(Debug)]
pub struct IntervalTask {
    #[cfg(not(feature = "testing"))]
    _task: Task<()>,
    #[cfg(not(feature = "testing"))]
    control: UnboundedSender<TimerMessage>,
}

#[derive(Debug)]
enum TimerMessage {
    Reset(Option<Duration>),
}

// ===== impl Task =====

impl<T> Task<T> {
    /// Spawns a new asynchronous task, returning a handle for it.
    pub fn spawn<Fut>(future: Fut) -> Task<T>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        Task {
            join_handle: task::spawn(future),
            detached: false,
        }
    }

    /// Spawns a supervised task that is restarted whenever it panics.
    ///
    /// Used for network receive loops, where discarding a packet that caused
    /// a panic is preferable to taking the whole routing instance down.
    pub fn spawn_supervised<F, Fut>(spawn_fn: F) -> Task<()>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let join_handle = tokio::spawn(
            async move {
                loop {
                    let worker_task = Task::spawn(spawn_fn());
                    match worker_task.await {
                        Ok(_) => break,
                        Err(error) if error.is_panic() => {
                            error!("task panicked, restarting...");
                            continue;
                        }
                        Err(error) => {
                            error!(%error, "task failed");
                            break;
                        }
                    }
                }
            }
            .in_current_span(),
        );
        Task {
            join_handle,
            detached: false,
        }
    }

    /// Detaches the task so it keeps running after the handle is dropped.
    pub fn detach(&mut self) {
        self.detached = true;
    }
}

impl<T> Future for Task<T> {
    type Output = Result<T, task::JoinError>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        Pin::new(&mut self.join_handle).poll(cx)
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        if !self.detached {
            self.join_handle.abort();
        }
    }
}

// ===== impl TimeoutTask =====

impl TimeoutTask {
    /// Spawns a task invoking the provided closure once the timeout expires.
    #[cfg(not(feature = "testing"))]
    pub fn new<F, Fut>(timeout: Duration, cb: F) -> TimeoutTask
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();

        let task = Task::spawn(
            async move {
                let timeout_fut = time::sleep(timeout);
                tokio::pin!(timeout_fut);

                loop {
                    tokio::select! {
                        _ = &mut timeout_fut => {
                            (cb)().await;
                            break;
                        }
                        message = control_rx.recv() => {
                            match message {
                                // Rearming resets the firing time.
                                Some(TimerMessage::Reset(timeout_new)) => {
                                    let timeout =
                                        timeout_new.unwrap_or(timeout);
                                    let next = Instant::now() + timeout;
                                    timeout_fut.as_mut().reset(next);
                                }
                                // Timeout has been aborted.
                                None => break,
                            }
                        }
                    }
                }
            }
            .in_current_span(),
        );

        TimeoutTask {
            _task: task,
            control: control_tx,
        }
    }

    #[cfg(feature = "testing")]
    pub fn new<F, Fut>(_timeout: Duration, _cb: F) -> TimeoutTask
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        TimeoutTask {}
    }

    /// Resets the timeout, whether or not it has already expired.
    ///
    /// If a new timeout value isn't specified, the last value is reused.
    pub fn reset(&mut self, timeout: Option<Duration>) {
        #[cfg(not(feature = "testing"))]
        if self.control.send(TimerMessage::Reset(timeout)).is_err() {
            error!("failed to reset timeout");
        }
    }
}

// ===== impl IntervalTask =====

impl IntervalTask {
    /// Spawns a task invoking the provided closure on every tick of the
    /// interval timer.
    #[cfg(not(feature = "testing"))]
    pub fn new<F, Fut>(
        interval: Duration,
        tick_on_start: bool,
        mut cb: F,
    ) -> IntervalTask
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();

        let task = Task::spawn(
            async move {
                let mut interval_fut = if tick_on_start {
                    time::interval(interval)
                } else {
                    time::interval_at(Instant::now() + interval, interval)
                };

                loop {
                    tokio::select! {
                        _ = interval_fut.tick() => {
                            (cb)().await;
                        }
                        message = control_rx.recv() => {
                            match message {
                                Some(TimerMessage::Reset(interval_new)) => {
                                    let interval =
                                        interval_new.unwrap_or(interval);
                                    interval_fut = time::interval_at(
                                        Instant::now() + interval,
                                        interval,
                                    );
                                }
                                // Interval timer has been aborted.
                                None => break,
                            }
                        }
                    }
                }
            }
            .in_current_span(),
        );

        IntervalTask {
            _task: task,
            control: control_tx,
        }
    }

    #[cfg(feature = "testing")]
    pub fn new<F, Fut>(
        _interval: Duration,
        _tick_on_start: bool,
        _cb: F,
    ) -> IntervalTask
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        IntervalTask {}
    }

    /// Resets the interval timer.
    ///
    /// If a new interval value isn't specified, the last value is reused.
    pub fn reset(&mut self, interval: Option<Duration>) {
        #[cfg(not(feature = "testing"))]
        if self.control.send(TimerMessage::Reset(interval)).is_err() {
            error!("failed to reset interval");
        }
    }
}
