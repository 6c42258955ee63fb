//! Background generation thread.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread;

use log::debug;

use crate::error::{Error, Result};
use crate::options::GenerationOptions;
use crate::pipeline::{CancelToken, JobId, Progress, PuzzleData, run_generation};
use crate::pixels::PixelBuffer;

/// Messages streamed back for one request: any number of `Progress`, then
/// exactly one terminal event.
#[derive(Debug)]
pub enum WorkerEvent {
    Progress(Progress),
    Finished(Box<PuzzleData>),
    Cancelled,
    Failed(String),
}

pub struct GenerationRequest {
    pub job: JobId,
    pub pixels: PixelBuffer,
    pub options: GenerationOptions,
    pub cancel: CancelToken,
    pub reply: mpsc::Sender<WorkerEvent>,
}

/// Handle to the worker thread. Dropping it closes the request channel and
/// joins the thread once queued requests drain.
pub struct GenerationWorker {
    requests: Option<mpsc::Sender<GenerationRequest>>,
    handle: Option<thread::JoinHandle<()>>,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "generation panicked".to_owned()
    }
}

fn serve(request: GenerationRequest) {
    let GenerationRequest { job, pixels, options, cancel, reply } = request;
    if cancel.is_cancelled() {
        let _ = reply.send(WorkerEvent::Cancelled);
        return;
    }
    let progress_tx = reply.clone();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        run_generation(job, &pixels, &options, &cancel, &mut |p| {
            let _ = progress_tx.send(WorkerEvent::Progress(p));
        })
    }));
    let event = match outcome {
        Ok(Some(data)) => WorkerEvent::Finished(Box::new(data)),
        Ok(None) => WorkerEvent::Cancelled,
        Err(payload) => WorkerEvent::Failed(panic_message(payload)),
    };
    let _ = reply.send(event);
}

impl GenerationWorker {
    pub fn spawn() -> Result<Self> {
        let (tx, rx) = mpsc::channel::<GenerationRequest>();
        let handle = thread::Builder::new()
            .name("puzzle-generation".to_owned())
            .spawn(move || {
                for request in rx {
                    serve(request);
                }
                debug!("generation worker stopped");
            })
            .map_err(|e| Error::Worker(format!("unable to spawn worker thread: {e}")))?;
        Ok(Self { requests: Some(tx), handle: Some(handle) })
    }

    pub fn submit(&self, request: GenerationRequest) -> Result<()> {
        let tx = self
            .requests
            .as_ref()
            .ok_or_else(|| Error::Worker("worker already shut down".to_owned()))?;
        tx.send(request).map_err(|_| Error::Worker("worker channel closed".to_owned()))
    }

    pub fn shutdown(&mut self) {
        self.requests.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for GenerationWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(cancel: CancelToken) -> (GenerationRequest, mpsc::Receiver<WorkerEvent>) {
        let (reply, events) = mpsc::channel();
        let data: Vec<u8> = (0..16).flat_map(|i| [i as u8 * 10, 0, 0, 255]).collect();
        let pixels = PixelBuffer::new(4, 4, data).unwrap();
        let options = GenerationOptions { seed: Some(1), target_colors: 2, ..Default::default() };
        (GenerationRequest { job: JobId(1), pixels, options, cancel, reply }, events)
    }

    #[test]
    fn streams_progress_then_one_terminal_event() {
        let worker = GenerationWorker::spawn().unwrap();
        let (req, events) = request(CancelToken::new());
        worker.submit(req).unwrap();
        let all: Vec<WorkerEvent> = events.iter().collect();
        let (last, progress) = all.split_last().unwrap();
        assert!(matches!(last, WorkerEvent::Finished(_)));
        assert!(progress.iter().all(|e| matches!(e, WorkerEvent::Progress(_))));
        assert!(progress.len() >= 5);
    }

    #[test]
    fn cancelled_before_start_reports_cancelled() {
        let worker = GenerationWorker::spawn().unwrap();
        let token = CancelToken::new();
        token.cancel();
        let (req, events) = request(token);
        worker.submit(req).unwrap();
        let all: Vec<WorkerEvent> = events.iter().collect();
        assert_eq!(all.len(), 1);
        assert!(matches!(all[0], WorkerEvent::Cancelled));
    }

    #[test]
    fn submit_after_shutdown_fails() {
        let mut worker = GenerationWorker::spawn().unwrap();
        worker.shutdown();
        let (req, _events) = request(CancelToken::new());
        assert!(matches!(worker.submit(req), Err(Error::Worker(_))));
    }
}
