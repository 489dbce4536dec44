//! Capture flow: camera lifecycle, single-frame extraction, then enrollment
//! or sign-in through a [`FaceGateway`].
//!
//! The camera is held by a [`CameraSession`] for as long as the view needs it
//! and released when the session is closed or dropped. Detection and
//! embedding are delegated to a [`FaceExtractor`].

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    auth::provider::Session,
    error::AppError,
    faces::{repo_types::DescriptorRecord, Descriptor},
};

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),

    #[error("camera session is closed")]
    SessionClosed,

    #[error("No face detected")]
    NoFaceDetected,

    #[error("extractor failed: {0}")]
    Extractor(String),

    #[error(transparent)]
    Remote(#[from] AppError),
}

impl CaptureError {
    /// Whether the user can simply try again with a new capture.
    pub fn is_retryable(&self) -> bool {
        match self {
            CaptureError::NoFaceDetected => true,
            CaptureError::Remote(AppError::FaceNotRecognized) => true,
            CaptureError::Remote(AppError::AuthProvider(_)) => true,
            CaptureError::CameraUnavailable(_)
            | CaptureError::SessionClosed
            | CaptureError::Extractor(_)
            | CaptureError::Remote(_) => false,
        }
    }
}

/// Raw frame grabbed from a camera stream.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

/// A camera device. `start` acquires the stream, `stop` releases it.
pub trait Camera: Send {
    fn start(&mut self) -> Result<(), CaptureError>;
    fn grab(&mut self) -> Result<Frame, CaptureError>;
    fn stop(&mut self);
}

/// Detection + embedding. Returns `None` when no face is in the frame; with
/// several faces the extractor picks the one it considers best.
pub trait FaceExtractor: Send + Sync {
    fn extract(&self, frame: &Frame) -> Result<Option<Vec<f32>>, CaptureError>;
}

/// Where captured descriptors go: the local service or a remote client.
#[async_trait]
pub trait FaceGateway: Send + Sync {
    async fn enroll(&self, user_id: Uuid, descriptor: &Descriptor) -> Result<DescriptorRecord, AppError>;
    async fn authenticate(&self, descriptor: &Descriptor) -> Result<Session, AppError>;
}

/// Exclusive hold on a started camera.
pub struct CameraSession<C: Camera> {
    camera: Option<C>,
}

impl<C: Camera> CameraSession<C> {
    pub fn open(mut camera: C) -> Result<Self, CaptureError> {
        camera.start()?;
        debug!("camera stream acquired");
        Ok(Self {
            camera: Some(camera),
        })
    }

    pub fn is_open(&self) -> bool {
        self.camera.is_some()
    }

    /// Grabs exactly one frame.
    pub fn capture(&mut self) -> Result<Frame, CaptureError> {
        self.camera
            .as_mut()
            .ok_or(CaptureError::SessionClosed)?
            .grab()
    }

    /// Releases the stream and hands the camera back.
    pub fn close(mut self) -> Option<C> {
        let mut camera = self.camera.take()?;
        camera.stop();
        debug!("camera stream released");
        Some(camera)
    }
}

impl<C: Camera> Drop for CameraSession<C> {
    fn drop(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            camera.stop();
            debug!("camera stream released on drop");
        }
    }
}

fn capture_descriptor<C: Camera, E: FaceExtractor>(
    session: &mut CameraSession<C>,
    extractor: &E,
    expected_len: usize,
) -> Result<Descriptor, CaptureError> {
    let frame = session.capture()?;
    let Some(values) = extractor.extract(&frame)? else {
        warn!("no face in captured frame");
        return Err(CaptureError::NoFaceDetected);
    };
    Descriptor::new(values, expected_len).map_err(|e| CaptureError::Extractor(e.to_string()))
}

/// Captures one frame and stores its descriptor for `user_id`.
/// Nothing is written when the frame holds no face.
pub async fn enroll<C, E, G>(
    session: &mut CameraSession<C>,
    extractor: &E,
    gateway: &G,
    user_id: Uuid,
    expected_len: usize,
) -> Result<DescriptorRecord, CaptureError>
where
    C: Camera,
    E: FaceExtractor,
    G: FaceGateway + ?Sized,
{
    let descriptor = capture_descriptor(session, extractor, expected_len)?;
    let record = gateway.enroll(user_id, &descriptor).await?;
    info!(%user_id, record_id = %record.id, "enrollment capture stored");
    Ok(record)
}

/// Captures one frame and signs in whoever it matches.
pub async fn authenticate<C, E, G>(
    session: &mut CameraSession<C>,
    extractor: &E,
    gateway: &G,
    expected_len: usize,
) -> Result<Session, CaptureError>
where
    C: Camera,
    E: FaceExtractor,
    G: FaceGateway + ?Sized,
{
    let descriptor = capture_descriptor(session, extractor, expected_len)?;
    Ok(gateway.authenticate(&descriptor).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[derive(Default, Clone)]
    struct Counters {
        started: Arc<AtomicUsize>,
        stopped: Arc<AtomicUsize>,
    }

    struct FakeCamera {
        counters: Counters,
        fail_start: bool,
    }

    impl FakeCamera {
        fn new(counters: &Counters) -> Self {
            Self {
                counters: counters.clone(),
                fail_start: false,
            }
        }
    }

    impl Camera for FakeCamera {
        fn start(&mut self) -> Result<(), CaptureError> {
            if self.fail_start {
                return Err(CaptureError::CameraUnavailable("permission denied".into()));
            }
            self.counters.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn grab(&mut self) -> Result<Frame, CaptureError> {
            Ok(Frame {
                width: 2,
                height: 1,
                rgb: vec![0; 6],
            })
        }

        fn stop(&mut self) {
            self.counters.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Extractor that always answers with the same result.
    struct FixedExtractor(Option<Vec<f32>>);

    impl FaceExtractor for FixedExtractor {
        fn extract(&self, _frame: &Frame) -> Result<Option<Vec<f32>>, CaptureError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn camera_is_released_on_drop_and_on_close() {
        let counters = Counters::default();
        {
            let session = CameraSession::open(FakeCamera::new(&counters)).unwrap();
            assert!(session.is_open());
        }
        assert_eq!(counters.stopped.load(Ordering::SeqCst), 1);

        let session = CameraSession::open(FakeCamera::new(&counters)).unwrap();
        let camera = session.close();
        assert!(camera.is_some());
        assert_eq!(counters.started.load(Ordering::SeqCst), 2);
        assert_eq!(counters.stopped.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn denied_camera_never_opens() {
        let counters = Counters::default();
        let mut camera = FakeCamera::new(&counters);
        camera.fail_start = true;
        let err = CameraSession::open(camera).err().unwrap();
        assert!(matches!(err, CaptureError::CameraUnavailable(_)));
        assert!(!err.is_retryable());
        assert_eq!(counters.stopped.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_face_writes_nothing_and_issues_no_session() {
        let state = AppState::fake();
        let counters = Counters::default();
        let mut session = CameraSession::open(FakeCamera::new(&counters)).unwrap();
        let extractor = FixedExtractor(None);
        let user_id = Uuid::new_v4();

        let err = enroll(&mut session, &extractor, &state, user_id, 128)
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::NoFaceDetected));
        assert!(err.is_retryable());
        assert!(state.faces.list_all_descriptors().await.unwrap().is_empty());

        let err = authenticate(&mut session, &extractor, &state, 128)
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::NoFaceDetected));
    }

    #[tokio::test]
    async fn wrong_length_vector_is_an_extractor_fault() {
        let state = AppState::fake();
        let counters = Counters::default();
        let mut session = CameraSession::open(FakeCamera::new(&counters)).unwrap();
        let extractor = FixedExtractor(Some(vec![0.1; 64]));

        let err = enroll(&mut session, &extractor, &state, Uuid::new_v4(), 128)
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::Extractor(_)));
        assert!(!err.is_retryable());
        assert!(state.faces.list_all_descriptors().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn enroll_then_authenticate_through_the_camera() {
        let state = AppState::fake();
        let identity = state
            .identity
            .create_identity(crate::auth::provider::IdentityRequest {
                email: "rosa@essalud.gob.pe".into(),
                password: "Secur3P@ssw0rd!".into(),
                roles: vec![crate::auth::Role::Patient],
                persona_id: None,
                display_name: None,
            })
            .await
            .unwrap();

        let counters = Counters::default();
        let mut session = CameraSession::open(FakeCamera::new(&counters)).unwrap();
        let extractor = FixedExtractor(Some(vec![0.05; 128]));

        enroll(&mut session, &extractor, &state, identity.id, 128)
            .await
            .unwrap();
        let signed_in = authenticate(&mut session, &extractor, &state, 128)
            .await
            .unwrap();
        assert_eq!(signed_in.user.id, identity.id);

        drop(session);
        assert_eq!(counters.stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closed_session_cannot_capture() {
        let state = AppState::fake();
        let counters = Counters::default();
        let mut session = CameraSession::open(FakeCamera::new(&counters)).unwrap();
        if let Some(mut camera) = session.camera.take() {
            camera.stop();
        }
        let err = authenticate(&mut session, &FixedExtractor(Some(vec![0.0; 128])), &state, 128)
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::SessionClosed));
    }
}
