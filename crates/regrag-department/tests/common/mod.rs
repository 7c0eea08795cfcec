//! Shared fixtures: deterministic providers and a small regulation corpus.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use regrag_core::chunk::{DEPARTMENT_KEY, SOURCE_KEY, TABLE_KEY};
use regrag_core::{DataPaths, DocumentChunk, EmbeddingError, EngineConfig};
use regrag_department::QueryEngine;
use regrag_infer::{EmbeddingProvider, NoopGenerator};

/// Topic phrase → embedding axis. Texts without a topic land on the last axis.
const TOPICS: &[&str] = &["học phí", "học bổng", "tuyển dụng", "lịch thi", "nội quy"];

pub const DIM: usize = TOPICS.len() + 1;

/// Embeds a text as the unit vector of the first topic phrase it contains.
pub struct TopicEmbedder;

#[async_trait]
impl EmbeddingProvider for TopicEmbedder {
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let lower = text.to_lowercase();
        let axis = TOPICS
            .iter()
            .position(|t| lower.contains(t))
            .unwrap_or(TOPICS.len());
        let mut v = vec![0.0; DIM];
        v[axis] = 1.0;
        Ok(v)
    }

    fn dimension(&self) -> usize {
        DIM
    }
}

/// Defaults with provider delays removed.
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.providers.max_retries = 0;
    config.providers.backoff_base_ms = 1;
    config.providers.inter_batch_delay_ms = 0;
    config.providers.embedding_dim = DIM;
    config
}

pub fn engine(paths: &DataPaths) -> QueryEngine {
    QueryEngine::new(
        test_config(),
        paths.clone(),
        Arc::new(TopicEmbedder),
        Arc::new(NoopGenerator),
    )
}

fn chunk(department: &str, source: &str, category: &str, text: &str) -> DocumentChunk {
    DocumentChunk::new(text)
        .with(DEPARTMENT_KEY, department)
        .with(SOURCE_KEY, source)
        .with("category", category)
}

/// Finance: a fee regulation in three chunks plus a table of programme codes.
pub fn finance_chunks() -> Vec<DocumentChunk> {
    vec![
        chunk("finance", "hoc_phi.md", "fee", "Điều 1. Học phí được thu theo tín chỉ đăng ký."),
        chunk("finance", "hoc_phi.md", "fee", "Điều 2. Mức học phí năm học 2024 là 450.000 đồng mỗi tín chỉ."),
        chunk("finance", "hoc_phi.md", "fee", "Điều 3. Sinh viên nộp học phí qua chuyển khoản ngân hàng."),
        chunk("finance", "ma_nganh.md", "code", "Danh mục mã ngành 7480201 và 7340101 áp dụng thu phí.")
            .with(TABLE_KEY, "true"),
    ]
}

pub fn student_affairs_chunks() -> Vec<DocumentChunk> {
    vec![
        chunk("student_affairs", "hoc_bong.md", "scholarship", "Học bổng khuyến khích học tập xét theo học kỳ."),
        chunk("student_affairs", "hoc_bong.md", "scholarship", "Điều kiện nhận học bổng: điểm rèn luyện từ khá trở lên."),
    ]
}

pub fn general_chunks() -> Vec<DocumentChunk> {
    vec![
        chunk("general", "noi_quy.md", "rules", "Nội quy trường: sinh viên đeo thẻ khi vào trường."),
        chunk("general", "noi_quy.md", "rules", "Nội quy thư viện: giữ trật tự, không mang đồ ăn."),
    ]
}

pub fn corpus() -> BTreeMap<String, Vec<DocumentChunk>> {
    let mut all = finance_chunks();
    all.extend(student_affairs_chunks());
    all.extend(general_chunks());
    all.push(DocumentChunk::new("Tài liệu không rõ phòng ban."));
    regrag_department::DepartmentGraphManager::group_by_department(all)
}
