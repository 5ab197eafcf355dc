use crate::engine::{EngineError, EngineHandle};
use chrono::{Local, NaiveDate};
use rollcall_core::FaceProbe;
use serde::Serialize;
use zbus::interface;

pub const BUS_NAME: &str = "org.rollcall.Attendance1";
pub const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

/// D-Bus interface for the Rollcall daemon. Every method returns JSON.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
pub struct RollcallService {
    engine: EngineHandle,
}

impl RollcallService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

#[interface(name = "org.rollcall.Attendance1")]
impl RollcallService {
    /// Classify the faces of one frame and mark recognized identities present.
    ///
    /// `faces_json` is an array of `{"location": {top, right, bottom, left}, "embedding": [..]}`.
    async fn recognize(&self, faces_json: &str) -> zbus::fdo::Result<String> {
        let faces: Vec<FaceProbe> = serde_json::from_str(faces_json)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("faces: {e}")))?;
        tracing::info!(faces = faces.len(), "recognize requested");
        let now = Local::now().naive_local();
        let report = self.engine.recognize(faces, now).await.map_err(failed)?;
        to_json(&report)
    }

    /// Rebuild the gallery from the sample directory.
    async fn train(&self) -> zbus::fdo::Result<String> {
        tracing::info!("train requested");
        let summary = self.engine.train().await.map_err(failed)?;
        to_json(&summary)
    }

    /// Today's attendance record (empty if nobody has been marked).
    async fn attendance_today(&self) -> zbus::fdo::Result<String> {
        let today = Local::now().date_naive();
        let record = self.engine.attendance(today).await.map_err(failed)?;
        to_json(&record)
    }

    /// Attendance for a `YYYY-MM-DD` date.
    async fn attendance_on(&self, date: &str) -> zbus::fdo::Result<String> {
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("date {date:?}: {e}")))?;
        let record = self.engine.attendance(date).await.map_err(failed)?;
        to_json(&record)
    }

    /// Every stored record, newest first.
    async fn attendance_all(&self) -> zbus::fdo::Result<String> {
        let records = self.engine.history().await.map_err(failed)?;
        to_json(&records)
    }

    /// Identity folders in the sample directory.
    async fn students(&self) -> zbus::fdo::Result<String> {
        let roster = self.engine.roster().await.map_err(failed)?;
        to_json(&roster)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(failed)?;
        to_json(&status)
    }
}

fn failed(err: EngineError) -> zbus::fdo::Error {
    tracing::warn!(error = %err, "request failed");
    zbus::fdo::Error::Failed(err.to_string())
}

fn to_json<T: Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}
