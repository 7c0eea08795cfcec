//! Query entry point: detection, permission gate, retrieval, optional answer.

use std::sync::Arc;

use tracing::{info, warn};

use regrag_core::{DataPaths, EngineConfig};
use regrag_infer::{BatchEmbedder, EmbeddingProvider, GenerationProvider, RetryPolicy};
use regrag_retrieve::RetrievedChunk;

use crate::detector::DepartmentDetector;
use crate::manager::DepartmentGraphManager;
use crate::types::{CallerMetadata, QueryAnswer, QueryStatus};

pub const NO_RESULTS_MESSAGE: &str =
    "Không tìm thấy thông tin liên quan trong tài liệu hiện có. Vui lòng diễn đạt lại câu hỏi hoặc liên hệ phòng ban phụ trách.";

pub fn permission_denied_message(department: &str) -> String {
    format!(
        "Xin lỗi, bạn không có quyền truy cập thông tin của phòng ban '{}'. Vui lòng liên hệ quản trị viên nếu cần hỗ trợ.",
        department
    )
}

/// Prompt for answer synthesis over retrieved chunks.
pub fn context_prompt(question: &str, chunks: &[RetrievedChunk]) -> String {
    let mut prompt = String::from("Dựa vào các đoạn tài liệu sau, hãy trả lời câu hỏi.\n\n");
    for (i, chunk) in chunks.iter().enumerate() {
        prompt.push_str(&format!("[{}] {}\n\n", i + 1, chunk.content));
    }
    prompt.push_str(&format!("Câu hỏi: {}\nTrả lời:", question));
    prompt
}

pub struct QueryEngine {
    detector: DepartmentDetector,
    manager: DepartmentGraphManager,
    generator: Arc<dyn GenerationProvider>,
    policy: RetryPolicy,
    k: usize,
}

impl QueryEngine {
    pub fn new(
        config: EngineConfig,
        paths: DataPaths,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
    ) -> Self {
        let detector = DepartmentDetector::new(
            config.departments.clone(),
            BatchEmbedder::from_config(Arc::clone(&embedder), &config.providers),
        );
        let policy = RetryPolicy::from_config(&config.providers);
        let k = config.retrieval.k;
        let manager = DepartmentGraphManager::new(config, paths, embedder, Arc::clone(&generator));
        Self {
            detector,
            manager,
            generator,
            policy,
            k,
        }
    }

    pub fn detector(&self) -> &DepartmentDetector {
        &self.detector
    }

    pub fn manager(&self) -> &DepartmentGraphManager {
        &self.manager
    }

    /// Load every persisted department graph and give the detector a
    /// representative embedding for each department that lacks one.
    pub fn load(&self) -> bool {
        let loaded = self.manager.load_all(&self.manager.paths().graphs);
        self.refresh_department_embeddings();
        loaded
    }

    /// Derive missing representative embeddings from loaded community centroids.
    pub fn refresh_department_embeddings(&self) {
        let derived: std::collections::HashMap<String, Vec<f32>> = self
            .manager
            .representative_embeddings()
            .into_iter()
            .filter(|(d, _)| !self.detector.has_department_embedding(d))
            .collect();
        if !derived.is_empty() {
            info!("Derived representative embeddings for {} departments", derived.len());
            self.detector.set_department_embeddings(derived);
        }
    }

    /// Decide, gate, retrieve. No answer synthesis.
    pub async fn answer_query(&self, text: &str, caller: &CallerMetadata) -> QueryAnswer {
        let decision = self.detector.decide(text, caller).await;
        if !decision.permission_granted {
            let message = permission_denied_message(&decision.chosen_department);
            return QueryAnswer {
                decision,
                chunks: Vec::new(),
                status: QueryStatus::PermissionDenied,
                message,
                answer: None,
            };
        }

        let outcome = self.manager.query(text, &decision, self.k).await;
        let message = match outcome.status {
            QueryStatus::Ok => String::new(),
            QueryStatus::FellBack => format!(
                "Không có kết quả trong phòng ban '{}'; hiển thị kết quả từ '{}'.",
                decision.chosen_department,
                outcome.department.as_deref().unwrap_or_default()
            ),
            QueryStatus::NoResults => NO_RESULTS_MESSAGE.to_string(),
            QueryStatus::PermissionDenied => permission_denied_message(&decision.chosen_department),
        };
        QueryAnswer {
            decision,
            chunks: outcome.chunks,
            status: outcome.status,
            message,
            answer: None,
        }
    }

    /// [`Self::answer_query`] plus an answer generated from the chunks.
    /// A generation failure leaves `answer` empty.
    pub async fn answer_with_synthesis(&self, text: &str, caller: &CallerMetadata) -> QueryAnswer {
        let mut result = self.answer_query(text, caller).await;
        if result.chunks.is_empty() || !self.generator.is_available() {
            return result;
        }
        let prompt = context_prompt(text, &result.chunks);
        let generator = &self.generator;
        match self.policy.run("answer", || generator.answer(&prompt)).await {
            Ok(answer) => result.answer = Some(answer),
            Err(e) => warn!("Answer synthesis failed: {}", e),
        }
        result
    }
}
