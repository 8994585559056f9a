//! Python bindings; results cross the boundary as JSON strings

use pyo3::exceptions::{PyKeyError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use serde::Serialize;

use crate::config::CoreConfig;
use crate::db::SqliteStore;
use crate::error::CoreError;
use crate::import::import_file;
use crate::models::QuizVariant;
use crate::session::{SessionOrchestrator, StartRequest, SubmitRequest};

fn to_py_err(e: CoreError) -> PyErr {
    let msg = format!("{}: {}", e.kind(), e);
    match e {
        CoreError::NotFound(_) => PyKeyError::new_err(msg),
        CoreError::PreconditionFailed(_) | CoreError::Config(_) | CoreError::Import(_) => {
            PyValueError::new_err(msg)
        }
        _ => PyRuntimeError::new_err(msg),
    }
}

fn to_json<T: Serialize>(value: &T) -> PyResult<String> {
    serde_json::to_string(value).map_err(|e| PyRuntimeError::new_err(e.to_string()))
}

/// Study engine over a SQLite database file
#[pyclass(unsendable)]
pub struct StudyEngine {
    inner: SessionOrchestrator<SqliteStore>,
}

#[pymethods]
impl StudyEngine {
    #[new]
    #[pyo3(signature = (db_path, config_path=None, seed=None))]
    fn new(db_path: &str, config_path: Option<&str>, seed: Option<u64>) -> PyResult<Self> {
        let config = match config_path {
            Some(path) => CoreConfig::load(path).map_err(to_py_err)?,
            None => CoreConfig::default(),
        };
        let store = SqliteStore::open(db_path).map_err(to_py_err)?;
        let mut inner = SessionOrchestrator::new(store, config).map_err(to_py_err)?;
        if let Some(seed) = seed {
            inner = inner.with_seed(seed);
        }
        Ok(Self { inner })
    }

    fn preview(&self, user_id: &str, total_cards: u32, review_ratio: f64) -> PyResult<String> {
        to_json(&self.inner.preview(user_id, total_cards, review_ratio).map_err(to_py_err)?)
    }

    #[pyo3(signature = (user_id, new_limit=None, review_limit=None, use_derived_ratio=false))]
    fn start(
        &self,
        user_id: &str,
        new_limit: Option<u32>,
        review_limit: Option<u32>,
        use_derived_ratio: bool,
    ) -> PyResult<String> {
        let request = StartRequest {
            new_limit,
            review_limit,
            use_derived_ratio,
        };
        to_json(&self.inner.start(user_id, &request).map_err(to_py_err)?)
    }

    #[pyo3(signature = (user_id, session_id, variant="direct_recall"))]
    fn next_card(&self, user_id: &str, session_id: &str, variant: &str) -> PyResult<String> {
        let variant: QuizVariant = variant.parse().map_err(to_py_err)?;
        to_json(&self.inner.next_card(user_id, session_id, variant).map_err(to_py_err)?)
    }

    #[pyo3(signature = (user_id, session_id, item_id, answer, hint_count=0, revealed=false, variant=None))]
    #[allow(clippy::too_many_arguments)]
    fn submit_answer(
        &self,
        user_id: &str,
        session_id: &str,
        item_id: i64,
        answer: &str,
        hint_count: u32,
        revealed: bool,
        variant: Option<&str>,
    ) -> PyResult<String> {
        let variant = variant
            .map(str::parse::<QuizVariant>)
            .transpose()
            .map_err(to_py_err)?;
        let request = SubmitRequest {
            item_id,
            answer: answer.to_string(),
            hint_count,
            revealed,
            variant,
        };
        to_json(&self.inner.submit_answer(user_id, session_id, &request).map_err(to_py_err)?)
    }

    #[pyo3(signature = (user_id, session_id, duration_seconds=None))]
    fn complete(&self, user_id: &str, session_id: &str, duration_seconds: Option<u64>) -> PyResult<String> {
        to_json(&self.inner.complete(user_id, session_id, duration_seconds).map_err(to_py_err)?)
    }

    fn abandon(&self, user_id: &str, session_id: &str) -> PyResult<String> {
        to_json(&self.inner.abandon(user_id, session_id).map_err(to_py_err)?)
    }

    #[pyo3(signature = (user_id, unreviewed_only=true))]
    fn wrong_answers(&self, user_id: &str, unreviewed_only: bool) -> PyResult<String> {
        to_json(&self.inner.wrong_answers(user_id, unreviewed_only).map_err(to_py_err)?)
    }

    #[pyo3(signature = (file_path, category=None))]
    fn import_vocabulary(&self, file_path: &str, category: Option<&str>) -> PyResult<usize> {
        import_file(self.inner.store(), file_path, category.unwrap_or("Default")).map_err(to_py_err)
    }

    fn __repr__(&self) -> String {
        format!(
            "StudyEngine(option_count={}, session_size={})",
            self.inner.config().quiz.option_count,
            self.inner.config().session.session_size
        )
    }
}
