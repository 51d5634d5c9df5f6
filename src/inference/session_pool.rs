use crate::error::{AppError, Result};
use crate::inference::tokenize::TokenBatch;
use crossbeam::queue::ArrayQueue;
use ndarray::Array3;
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use std::cell::UnsafeCell;
use std::path::Path;

/// A pool of ONNX Runtime sessions for concurrent inference.
///
/// `Session::run` takes `&mut self`. Rather than serialize callers behind a
/// Mutex, the pool holds N independent sessions and hands out exclusive
/// indices through a lock-free queue. An index is owned by exactly one
/// `SessionLease` between pop and push.
pub struct SessionPool {
    sessions: Vec<UnsafeCell<Session>>,
    available: ArrayQueue<usize>,
}

/// Exclusive use of one pooled session; returned to the pool on drop.
struct SessionLease<'a> {
    pool: &'a SessionPool,
    index: usize,
}

impl Drop for SessionLease<'_> {
    fn drop(&mut self) {
        // only indices popped from the queue are pushed back, so this cannot overflow
        let _ = self.pool.available.push(self.index);
    }
}

impl SessionPool {
    /// Load `pool_size` sessions from one model file, single intra-op thread each.
    pub fn load(model_path: &Path, pool_size: usize) -> Result<Self> {
        let pool_size = pool_size.max(1);
        let model_bytes = std::fs::read(model_path).map_err(|e| {
            AppError::ModelError(format!(
                "failed to read model file '{}': {}",
                model_path.display(),
                e
            ))
        })?;

        let mut sessions = Vec::with_capacity(pool_size);
        let available = ArrayQueue::new(pool_size);

        for i in 0..pool_size {
            let session = Session::builder()
                .map_err(|e| AppError::ModelError(e.to_string()))?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .map_err(|e| AppError::ModelError(e.to_string()))?
                .with_intra_threads(1)
                .map_err(|e| AppError::ModelError(e.to_string()))?
                .commit_from_memory(&model_bytes)
                .map_err(|e: ort::Error| AppError::ModelError(e.to_string()))?;

            sessions.push(UnsafeCell::new(session));
            available
                .push(i)
                .map_err(|_| AppError::ModelError("failed to initialize session pool".into()))?;
        }

        tracing::info!(
            path = %model_path.display(),
            pool_size,
            "ONNX session pool loaded"
        );

        Ok(Self {
            sessions,
            available,
        })
    }

    /// Number of sessions; callers gate concurrent use to this many.
    pub fn size(&self) -> usize {
        self.sessions.len()
    }

    /// Cannot come up empty while callers hold at most `size()` concurrent
    /// calls; the reranker's semaphore enforces that.
    fn lease(&self) -> Result<SessionLease<'_>> {
        let index = self
            .available
            .pop()
            .ok_or_else(|| AppError::ScorerError("no available sessions in pool".into()))?;
        Ok(SessionLease { pool: self, index })
    }

    /// Run the model and return one raw logit per pair.
    ///
    /// XLM-RoBERTa style rerankers take only `input_ids` and `attention_mask`.
    pub fn logits(&self, batch: &TokenBatch) -> Result<Vec<f32>> {
        let batch_size = batch.batch_size();
        let (_shape, data) = self.run(batch, "logits")?;

        if data.len() < batch_size {
            return Err(AppError::ModelError(format!(
                "expected {} logits, model returned {}",
                batch_size,
                data.len()
            )));
        }

        // [batch, 1] output is flattened; first `batch_size` values are the scores
        Ok(data.into_iter().take(batch_size).collect())
    }

    /// Token embeddings, shape `(batch, seq_len, hidden)`.
    pub fn last_hidden_state(&self, batch: &TokenBatch) -> Result<Array3<f32>> {
        let (shape, data) = self.run(batch, "last_hidden_state")?;
        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
        if dims.len() != 3 || dims[0] != batch.batch_size() || dims[1] != batch.seq_len() {
            return Err(AppError::ModelError(format!(
                "unexpected last_hidden_state shape {:?} for batch {}x{}",
                dims,
                batch.batch_size(),
                batch.seq_len()
            )));
        }
        Array3::from_shape_vec((dims[0], dims[1], dims[2]), data)
            .map_err(|e| AppError::ModelError(e.to_string()))
    }

    /// One forward pass on a leased session, returning the named output.
    fn run(&self, batch: &TokenBatch, output: &str) -> Result<(Vec<i64>, Vec<f32>)> {
        let shape = [batch.batch_size(), batch.seq_len()];

        let input_ids: Vec<i64> = batch.input_ids.iter().copied().collect();
        let attention_mask: Vec<i64> = batch.attention_mask.iter().copied().collect();
        let input_ids_tensor = Tensor::from_array((shape, input_ids))
            .map_err(|e| AppError::ModelError(e.to_string()))?;
        let attention_mask_tensor = Tensor::from_array((shape, attention_mask))
            .map_err(|e| AppError::ModelError(e.to_string()))?;

        let lease = self.lease()?;

        // SAFETY: `lease` holds the only copy of this index until it drops,
        // so no other thread can reach the same session concurrently.
        let session = unsafe { &mut *self.sessions[lease.index].get() };

        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor,
            ])
            .map_err(|e| AppError::ModelError(e.to_string()))?;

        let value = outputs
            .get(output)
            .ok_or_else(|| AppError::ModelError(format!("no '{}' output found", output)))?;
        let (shape, data) = value
            .try_extract_tensor::<f32>()
            .map_err(|e| AppError::ModelError(e.to_string()))?;

        Ok((shape.iter().copied().collect(), data.to_vec()))
    }
}

// SAFETY: sessions are only reached through a `SessionLease`, and the
// ArrayQueue hands each index to at most one lease at a time. That gives the
// same mutual exclusion as a Mutex per session without blocking.
unsafe impl Send for SessionPool {}
unsafe impl Sync for SessionPool {}
