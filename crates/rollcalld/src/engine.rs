use chrono::{NaiveDate, NaiveDateTime};
use rollcall_core::{
    BoundingBox, EngineConfig, FaceProbe, LinearMatcher, MatchResult, Matcher, Trainer, Verdict,
};
use rollcall_store::{
    samples, AttendanceLedger, AttendanceRecord, Config, GalleryStore, LedgerError, StoreError,
};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("gallery error: {0}")]
    Store(#[from] StoreError),
    #[error("attendance error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("sample directory {path}: {source}")]
    Samples {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecognizedFace {
    pub identity: String,
    pub confidence: f32,
    pub distance: f32,
    pub location: BoundingBox,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnknownFace {
    /// `null` in JSON when the gallery had nothing comparable.
    pub distance: f32,
    pub location: BoundingBox,
}

/// A face whose embedding could not be classified at all.
#[derive(Debug, Clone, Serialize)]
pub struct RejectedFace {
    pub error: String,
    pub location: BoundingBox,
}

/// Everything a caller learns from one frame.
#[derive(Debug, Clone, Serialize)]
pub struct RecognizeReport {
    pub recognized: Vec<RecognizedFace>,
    pub unknown: Vec<UnknownFace>,
    pub rejected: Vec<RejectedFace>,
    /// Today's record after marking; absent when nobody was recognized.
    pub attendance: Option<AttendanceRecord>,
    /// Set when at least one face was not recognized.
    pub alert: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainSummary {
    pub trained: bool,
    pub identities: usize,
    pub references: usize,
    pub skipped_identities: Vec<String>,
    pub rejected_samples: usize,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub version: &'static str,
    pub identities: usize,
    pub references: usize,
    pub threshold: f32,
    pub vector_dim: usize,
    pub metric: String,
    pub gallery_path: PathBuf,
    pub attendance_dir: PathBuf,
}

/// Matching state plus the stores it reads and writes.
pub struct Engine {
    store: GalleryStore,
    ledger: AttendanceLedger,
    samples_dir: PathBuf,
    engine: EngineConfig,
    matcher: LinearMatcher,
    trainer: Trainer,
}

impl Engine {
    pub fn open(config: &Config) -> Result<Self, EngineError> {
        let store = GalleryStore::open(&config.gallery_path)?;
        let ledger = AttendanceLedger::open(&config.attendance_dir)?.with_retry(config.lock_retry);
        Ok(Self {
            store,
            ledger,
            samples_dir: config.samples_dir.clone(),
            engine: config.engine,
            matcher: config.engine.matcher(),
            trainer: config.engine.trainer(),
        })
    }

    /// Classify every face, then mark all recognized identities in one go.
    pub fn recognize(
        &self,
        faces: &[FaceProbe],
        when: NaiveDateTime,
    ) -> Result<RecognizeReport, EngineError> {
        let mut gallery = self.store.snapshot();
        if gallery.is_empty() {
            // Another process may have trained since we started.
            gallery = self.store.reload()?;
        }
        tracing::info!(faces = faces.len(), identities = gallery.len(), "recognize");

        let mut recognized = Vec::new();
        let mut unknown = Vec::new();
        let mut rejected = Vec::new();

        let results = self
            .matcher
            .classify_faces(faces, &gallery, self.engine.threshold);
        for (face, result) in faces.iter().zip(results) {
            match result {
                Ok(MatchResult {
                    location,
                    verdict: Verdict::Recognized { identity, distance },
                }) => {
                    tracing::info!(%identity, distance, "face recognized");
                    recognized.push(RecognizedFace {
                        identity,
                        confidence: 1.0 - distance,
                        distance,
                        location,
                    });
                }
                Ok(MatchResult {
                    location,
                    verdict: Verdict::Unknown { distance },
                }) => {
                    tracing::info!(distance, threshold = self.engine.threshold, "face unknown");
                    unknown.push(UnknownFace { distance, location });
                }
                Err(err) => {
                    tracing::warn!(error = %err, "face rejected");
                    rejected.push(RejectedFace {
                        error: err.to_string(),
                        location: face.location,
                    });
                }
            }
        }

        let attendance = if recognized.is_empty() {
            None
        } else {
            let ids = recognized.iter().map(|r| r.identity.as_str());
            Some(self.ledger.mark_present(ids, when)?)
        };

        let mut message = format!("Found {} known face(s)", recognized.len());
        if !unknown.is_empty() {
            message.push_str(&format!(" and {} unknown", unknown.len()));
        }

        Ok(RecognizeReport {
            alert: !unknown.is_empty(),
            recognized,
            unknown,
            rejected,
            attendance,
            message,
        })
    }

    /// Rebuild the gallery from the sample directory.
    pub fn train(&self) -> Result<TrainSummary, EngineError> {
        let samples = samples::scan_samples(&self.samples_dir).map_err(|source| {
            EngineError::Samples {
                path: self.samples_dir.clone(),
                source,
            }
        })?;
        let outcome = self.store.train(&self.trainer, samples)?;
        let trained = outcome.is_trained();
        let report = outcome.into_report();

        let message = if trained {
            format!(
                "Created embeddings for {} identities ({} references)",
                report.gallery.len(),
                report.gallery.reference_count()
            )
        } else {
            "No trainable identities; previous gallery kept".to_string()
        };

        Ok(TrainSummary {
            trained,
            identities: report.gallery.len(),
            references: report.gallery.reference_count(),
            rejected_samples: report.rejected_total(),
            skipped_identities: report.skipped_identities,
            message,
        })
    }

    pub fn attendance(&self, date: NaiveDate) -> Result<AttendanceRecord, EngineError> {
        Ok(self.ledger.get(date)?)
    }

    pub fn history(&self) -> Result<Vec<AttendanceRecord>, EngineError> {
        Ok(self.ledger.list_all()?)
    }

    pub fn roster(&self) -> Result<Vec<String>, EngineError> {
        samples::list_identities(&self.samples_dir).map_err(|source| EngineError::Samples {
            path: self.samples_dir.clone(),
            source,
        })
    }

    pub fn status(&self) -> EngineStatus {
        let gallery = self.store.snapshot();
        EngineStatus {
            version: env!("CARGO_PKG_VERSION"),
            identities: gallery.len(),
            references: gallery.reference_count(),
            threshold: self.engine.threshold,
            vector_dim: self.engine.vector_dim,
            metric: self.engine.metric.to_string(),
            gallery_path: self.store.path().to_path_buf(),
            attendance_dir: self.ledger.dir().to_path_buf(),
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Recognize {
        faces: Vec<FaceProbe>,
        when: NaiveDateTime,
        reply: Reply<RecognizeReport>,
    },
    Train {
        reply: Reply<TrainSummary>,
    },
    Attendance {
        date: NaiveDate,
        reply: Reply<AttendanceRecord>,
    },
    History {
        reply: Reply<Vec<AttendanceRecord>>,
    },
    Roster {
        reply: Reply<Vec<String>>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn call<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn recognize(
        &self,
        faces: Vec<FaceProbe>,
        when: NaiveDateTime,
    ) -> Result<RecognizeReport, EngineError> {
        self.call(|reply| EngineRequest::Recognize { faces, when, reply })
            .await
    }

    pub async fn train(&self) -> Result<TrainSummary, EngineError> {
        self.call(|reply| EngineRequest::Train { reply }).await
    }

    pub async fn attendance(&self, date: NaiveDate) -> Result<AttendanceRecord, EngineError> {
        self.call(|reply| EngineRequest::Attendance { date, reply })
            .await
    }

    pub async fn history(&self) -> Result<Vec<AttendanceRecord>, EngineError> {
        self.call(|reply| EngineRequest::History { reply }).await
    }

    pub async fn roster(&self) -> Result<Vec<String>, EngineError> {
        self.call(|reply| EngineRequest::Roster { reply }).await
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Status { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Run the engine on a dedicated OS thread.
///
/// All file I/O happens there, so D-Bus handlers never block the async
/// runtime, and requests are served one at a time in arrival order.
pub fn spawn_engine(engine: Engine, queue_depth: usize) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(queue_depth.max(1));

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Recognize { faces, when, reply } => {
                        let _ = reply.send(engine.recognize(&faces, when));
                    }
                    EngineRequest::Train { reply } => {
                        let _ = reply.send(engine.train());
                    }
                    EngineRequest::Attendance { date, reply } => {
                        let _ = reply.send(engine.attendance(date));
                    }
                    EngineRequest::History { reply } => {
                        let _ = reply.send(engine.history());
                    }
                    EngineRequest::Roster { reply } => {
                        let _ = reply.send(engine.roster());
                    }
                    EngineRequest::Status { reply } => {
                        let _ = reply.send(engine.status());
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::Embedding;
    use std::path::Path;

    fn config(root: &Path) -> Config {
        let root = root.to_str().unwrap().to_string();
        Config::from_lookup(move |key| match key {
            "ROLLCALL_DATA_DIR" => Some(root.clone()),
            "ROLLCALL_VECTOR_DIM" => Some("3".into()),
            _ => None,
        })
        .unwrap()
    }

    fn enroll(cfg: &Config, identity: &str, file: &str, values: &[f32]) {
        let dir = cfg.samples_dir.join(identity);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(file), serde_json::to_vec(values).unwrap()).unwrap();
    }

    fn face(left: i32, values: &[f32]) -> FaceProbe {
        FaceProbe {
            location: BoundingBox::new(10, left + 40, 50, left).unwrap(),
            embedding: Embedding::new(values.to_vec()),
        }
    }

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 9, 2)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_train_then_recognize_marks_attendance() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        enroll(&cfg, "alice", "1.json", &[1.0, 0.0, 0.0]);
        enroll(&cfg, "bob", "1.json", &[0.0, 1.0, 0.0]);
        enroll(&cfg, "bob", "2.json", &[0.0, 0.9, 0.1]);
        enroll(&cfg, "carol", "broken.json", &[]);

        let engine = Engine::open(&cfg).unwrap();
        let summary = engine.train().unwrap();
        assert!(summary.trained);
        assert_eq!(summary.identities, 2);
        assert_eq!(summary.references, 3);
        assert_eq!(summary.skipped_identities, vec!["carol".to_string()]);
        assert_eq!(engine.roster().unwrap(), vec!["alice", "bob", "carol"]);

        let faces = vec![
            face(0, &[0.0, 1.0, 0.05]),
            face(100, &[0.0, 0.0, 1.0]),
            face(200, &[1.0, 0.0]),
        ];
        let report = engine.recognize(&faces, noon()).unwrap();
        assert_eq!(report.recognized.len(), 1);
        assert_eq!(report.recognized[0].identity, "bob");
        assert_eq!(report.recognized[0].location, faces[0].location);
        assert_eq!(report.unknown.len(), 1);
        assert_eq!(report.rejected.len(), 1);
        assert!(report.alert);
        assert_eq!(report.message, "Found 1 known face(s) and 1 unknown");

        let attendance = report.attendance.unwrap();
        assert_eq!(attendance.len(), 1);
        assert!(attendance.contains("bob"));
        assert_eq!(engine.attendance(noon().date()).unwrap(), attendance);
        assert_eq!(engine.history().unwrap().len(), 1);
    }

    #[test]
    fn test_recognize_without_gallery_marks_nobody() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let engine = Engine::open(&cfg).unwrap();

        let report = engine.recognize(&[face(0, &[1.0, 0.0, 0.0])], noon()).unwrap();
        assert!(report.recognized.is_empty());
        assert_eq!(report.unknown.len(), 1);
        assert!(report.attendance.is_none());
        assert!(engine.history().unwrap().is_empty());
    }

    #[test]
    fn test_empty_gallery_picks_up_training_from_elsewhere() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let engine = Engine::open(&cfg).unwrap();

        // A second process (the CLI) trains while the engine is running.
        enroll(&cfg, "alice", "1.json", &[1.0, 0.0, 0.0]);
        Engine::open(&cfg).unwrap().train().unwrap();

        let report = engine.recognize(&[face(0, &[1.0, 0.0, 0.0])], noon()).unwrap();
        assert_eq!(report.recognized.len(), 1);
        assert!(!report.alert);
    }

    #[test]
    fn test_training_nothing_keeps_gallery() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let engine = Engine::open(&cfg).unwrap();
        let summary = engine.train().unwrap();
        assert!(!summary.trained);
        assert_eq!(engine.status().identities, 0);
    }

    #[tokio::test]
    async fn test_handle_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        enroll(&cfg, "alice", "1.json", &[1.0, 0.0, 0.0]);
        let handle = spawn_engine(Engine::open(&cfg).unwrap(), 4).unwrap();

        assert!(handle.train().await.unwrap().trained);
        let status = handle.status().await.unwrap();
        assert_eq!(status.identities, 1);
        assert_eq!(status.metric, "cosine");

        let report = handle
            .recognize(vec![face(0, &[0.9, 0.1, 0.0])], noon())
            .await
            .unwrap();
        assert_eq!(report.recognized[0].identity, "alice");
        let record = handle.attendance(noon().date()).await.unwrap();
        assert!(record.contains("alice"));
    }
}
