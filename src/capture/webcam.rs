use super::{CaptureError, FrameClock, FrameTimestamp, MediaDevices, StreamEvent, VideoSource};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use image::RgbImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

const FRAME_QUEUE_CAPACITY: usize = 2;

type CapturedFrame = (FrameTimestamp, RgbImage);

/// Opens webcams by index.
///
/// Frame timestamps count from the creation of the `WebcamDevices`, not of each
/// stream, so they keep increasing when the camera is re-acquired.
pub struct WebcamDevices {
    device_index: u32,
    width: u32,
    height: u32,
    epoch: Instant,
}

impl WebcamDevices {
    pub fn new(device_index: u32, width: u32, height: u32) -> Self {
        Self {
            device_index,
            width,
            height,
            epoch: Instant::now(),
        }
    }
}

fn frame_timestamp(epoch: Instant, captured: Instant) -> FrameTimestamp {
    FrameTimestamp::from_millis(captured.saturating_duration_since(epoch).as_secs_f64() * 1000.0)
}

impl MediaDevices for WebcamDevices {
    fn request_stream(&mut self) -> Result<Box<dyn VideoSource>, CaptureError> {
        tracing::info!(
            "Requesting webcam {} at {}x{}",
            self.device_index,
            self.width,
            self.height
        );

        let (tx, rx) = crossbeam_channel::bounded(FRAME_QUEUE_CAPACITY);
        let stop = Arc::new(AtomicBool::new(false));
        let (index, width, height, epoch) =
            (self.device_index, self.width, self.height, self.epoch);
        let worker_stop = Arc::clone(&stop);

        let worker = std::thread::Builder::new()
            .name("webcam-capture".into())
            .spawn(move || capture_thread(index, width, height, epoch, tx, worker_stop))
            .map_err(|e| CaptureError::Open {
                index,
                reason: e.to_string(),
            })?;

        Ok(Box::new(WebcamStream::new(rx, stop, Some(worker))))
    }
}

/// Opens the camera and forwards decoded frames until stopped.
///
/// nokhwa cameras are not `Send`, so the camera lives entirely on this thread.
fn capture_thread(
    index: u32,
    width: u32,
    height: u32,
    epoch: Instant,
    tx: Sender<Result<CapturedFrame, CaptureError>>,
    stop: Arc<AtomicBool>,
) {
    let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::HighestResolution(
        Resolution::new(width, height),
    ));

    let camera = Camera::new(CameraIndex::Index(index), requested).and_then(|mut camera| {
        camera.open_stream()?;
        Ok(camera)
    });
    let mut camera = match camera {
        Ok(camera) => camera,
        Err(e) => {
            let _ = tx.send(Err(CaptureError::Open {
                index,
                reason: e.to_string(),
            }));
            return;
        }
    };

    tracing::info!("Webcam {} streaming", index);

    while !stop.load(Ordering::Relaxed) {
        let frame = camera
            .frame()
            .map_err(|e| CaptureError::Stream(e.to_string()))
            .and_then(|buffer| {
                buffer
                    .decode_image::<RgbFormat>()
                    .map_err(|e| CaptureError::Decode(e.to_string()))
            });
        let timestamp = frame_timestamp(epoch, Instant::now());
        let failed = frame.is_err();

        match tx.try_send(frame.map(|image| (timestamp, image))) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => break,
        }
        if failed {
            break;
        }
    }

    if let Err(e) = camera.stop_stream() {
        tracing::warn!("Failed to stop webcam {}: {}", index, e);
    }
    tracing::debug!("Capture thread for webcam {} exiting", index);
}

/// Session-side end of a webcam: keeps only the newest delivered frame
pub struct WebcamStream {
    frames: Receiver<Result<CapturedFrame, CaptureError>>,
    current: Option<CapturedFrame>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl WebcamStream {
    fn new(
        frames: Receiver<Result<CapturedFrame, CaptureError>>,
        stop: Arc<AtomicBool>,
        worker: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            frames,
            current: None,
            stop,
            worker,
        }
    }
}

impl FrameClock for WebcamStream {
    fn current_time(&self) -> FrameTimestamp {
        self.current
            .as_ref()
            .map(|(timestamp, _)| *timestamp)
            .unwrap_or(FrameTimestamp::ZERO)
    }
}

impl VideoSource for WebcamStream {
    fn poll(&mut self) -> Result<Option<StreamEvent>, CaptureError> {
        let had_frame = self.current.is_some();

        loop {
            match self.frames.try_recv() {
                Ok(frame) => self.current = Some(frame?),
                Err(crossbeam_channel::TryRecvError::Empty) => break,
                Err(crossbeam_channel::TryRecvError::Disconnected) => {
                    return Err(CaptureError::Disconnected)
                }
            }
        }

        if !had_frame && self.current.is_some() {
            Ok(Some(StreamEvent::FirstFrame))
        } else {
            Ok(None)
        }
    }

    fn current_frame(&self) -> Option<&RgbImage> {
        self.current.as_ref().map(|(_, image)| image)
    }
}

impl Drop for WebcamStream {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("Webcam capture thread panicked");
            }
        }
    }
}
