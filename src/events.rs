//! Eventfd-based cgroup notification dispatch.
//!
//! Registration writes `<eventfd> <fd> [args]` into the cgroup's
//! `cgroup.event_control` file and parks a reader thread on the eventfd.
//! Each kernel wakeup invokes the registered callback; the thread exits
//! when the registration is cancelled or the watched cgroup disappears.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use crate::common::WrapIoResult;
use crate::kernel::KernelApi;
use crate::status::Status;

const CGROUP_EVENT_CONTROL: &str = "cgroup.event_control";

/// Opaque handle to one registration, used to cancel it.
pub type NotificationId = u64;

/// Callback owned by the notification service once registration succeeds.
/// Invoked once per delivered event, on the reader thread.
pub type EventCallback = Box<dyn FnMut(Result<(), Status>) + Send + 'static>;

#[derive(Debug)]
struct Registration {
    wake: Arc<File>,
    cancelled: Arc<AtomicBool>,
}

#[derive(Default, Debug)]
struct Inner {
    next_id: AtomicU64,
    registrations: Mutex<HashMap<NotificationId, Registration>>,
}

/// Thread-safe, process-wide notification service.
#[derive(Debug)]
pub struct EventFdNotifications {
    kernel: Arc<KernelApi>,
    inner: Arc<Inner>,
}

impl EventFdNotifications {
    pub fn new(kernel: Arc<KernelApi>) -> Self {
        EventFdNotifications {
            kernel,
            inner: Arc::new(Inner::default()),
        }
    }

    /// Arms an eventfd for `event_file` within `cgroup_path`. The callback
    /// is consumed; on a failed registration it is dropped before the error
    /// is returned.
    pub fn register_notification(
        &self,
        cgroup_path: &Path,
        event_file: &str,
        args: &str,
        mut callback: EventCallback,
    ) -> Result<NotificationId, Status> {
        let event_path = cgroup_path.join(event_file);
        let event = File::open(&event_path).wrap_open(&event_path)?;
        let efd = self
            .kernel
            .eventfd()
            .map_err(|err| Status::internal(format!("failed to create eventfd: {err}")))?;
        let efd = File::from(efd);

        let control_path = cgroup_path.join(CGROUP_EVENT_CONTROL);
        let line = if args.is_empty() {
            format!("{} {}", efd.as_raw_fd(), event.as_raw_fd())
        } else {
            format!("{} {} {}", efd.as_raw_fd(), event.as_raw_fd(), args)
        };
        self.kernel.write_file_str(&control_path, &line)?;
        // the kernel holds its own reference to the event file from here on
        drop(event);

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let wake = Arc::new(efd);
        let cancelled = Arc::new(AtomicBool::new(false));
        self.inner
            .registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                Registration {
                    wake: Arc::clone(&wake),
                    cancelled: Arc::clone(&cancelled),
                },
            );

        let inner = Arc::clone(&self.inner);
        thread::spawn(move || {
            let mut buf = [0u8; 8];
            loop {
                if (&*wake).read_exact(&mut buf).is_err() {
                    break;
                }
                if cancelled.load(Ordering::Acquire) {
                    break;
                }
                // removing the watched cgroup fires one final wakeup
                if !control_path.exists() {
                    break;
                }
                callback(Ok(()));
            }

            inner
                .registrations
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
        });

        Ok(id)
    }

    /// Cancels a registration. The callback will not be invoked again once
    /// this returns.
    pub fn cancel(&self, id: NotificationId) -> Result<(), Status> {
        let registrations = self
            .inner
            .registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let registration = registrations
            .get(&id)
            .ok_or_else(|| Status::not_found(format!("no notification registered under id {id}")))?;

        registration.cancelled.store(true, Ordering::Release);
        // wake the reader so it can observe the flag and exit
        let _ = (&*registration.wake).write_all(&1u64.to_ne_bytes());
        Ok(())
    }
}
