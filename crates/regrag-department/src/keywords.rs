//! Department keyword tables and the keyword signal.
//!
//! Curated high-priority phrases score 3, other multi-word phrases 2 and
//! single words 1. Matching is a lowercase substring test.

use once_cell::sync::Lazy;

use crate::types::{Signal, SignalSource};

const PRIORITY_WEIGHT: f32 = 3.0;
const PHRASE_WEIGHT: f32 = 2.0;
const WORD_WEIGHT: f32 = 1.0;

/// Score at which a department's keyword evidence counts as saturated.
const SATURATION_SCORE: f32 = 3.0;

struct DepartmentKeywords {
    department: &'static str,
    priority: &'static [&'static str],
    terms: &'static [&'static str],
}

static TABLES: Lazy<Vec<DepartmentKeywords>> = Lazy::new(|| {
    vec![
        DepartmentKeywords {
            department: "academic_affairs",
            priority: &["đăng ký học phần", "chương trình đào tạo", "xét tốt nghiệp"],
            terms: &[
                "tín chỉ", "học phần", "lịch thi", "điểm thi", "học lại", "thời khóa biểu",
                "học vụ", "tốt nghiệp", "đào tạo", "môn học", "thi",
            ],
        },
        DepartmentKeywords {
            department: "student_affairs",
            priority: &["điểm rèn luyện", "khen thưởng sinh viên", "kỷ luật sinh viên"],
            terms: &[
                "học bổng", "ký túc xá", "rèn luyện", "bảo hiểm y tế", "khen thưởng", "kỷ luật",
                "sinh viên", "ktx",
            ],
        },
        DepartmentKeywords {
            department: "finance",
            priority: &["học phí", "miễn giảm học phí", "hoàn học phí"],
            terms: &["lệ phí", "thanh toán", "chuyển khoản", "số tiền", "tài chính", "phí", "tiền"],
        },
        DepartmentKeywords {
            department: "personnel",
            priority: &["tuyển dụng", "hợp đồng lao động"],
            terms: &["cán bộ", "giảng viên", "nhân sự", "nghỉ phép", "bổ nhiệm", "lương", "viên chức"],
        },
        DepartmentKeywords {
            department: "research",
            priority: &["đề tài nghiên cứu", "nghiên cứu khoa học"],
            terms: &["bài báo", "hội thảo", "công bố", "sáng chế", "nghiên cứu", "nckh"],
        },
        DepartmentKeywords {
            department: "general",
            priority: &["thông báo chung"],
            terms: &["nội quy", "quy chế", "liên hệ", "địa chỉ"],
        },
    ]
});

fn term_weight(term: &str) -> f32 {
    if term.split_whitespace().count() > 1 {
        PHRASE_WEIGHT
    } else {
        WORD_WEIGHT
    }
}

/// Raw keyword score per department, best first, zero scores dropped.
pub fn keyword_scores(query: &str) -> Vec<(&'static str, f32)> {
    let lower = query.to_lowercase();
    let mut scores: Vec<(&'static str, f32)> = TABLES
        .iter()
        .map(|table| {
            let priority: f32 = table
                .priority
                .iter()
                .filter(|p| lower.contains(*p))
                .map(|_| PRIORITY_WEIGHT)
                .sum();
            let terms: f32 = table
                .terms
                .iter()
                .filter(|t| lower.contains(*t))
                .map(|t| term_weight(t))
                .sum();
            (table.department, priority + terms)
        })
        .filter(|(_, s)| *s > 0.0)
        .collect();
    scores.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(b.0))
    });
    scores
}

/// Up to two keyword signals. Confidence is the department's share of all
/// keyword mass, scaled down while its own score is below saturation.
pub fn keyword_signals(query: &str) -> Vec<Signal> {
    let scores = keyword_scores(query);
    let total: f32 = scores.iter().map(|(_, s)| s).sum();
    if total <= 0.0 {
        return Vec::new();
    }
    scores
        .into_iter()
        .take(2)
        .map(|(department, score)| {
            let confidence = (score / total) * (score / SATURATION_SCORE).min(1.0);
            Signal::new(department, confidence, SignalSource::QueryKeyword)
        })
        .collect()
}

/// Departments that have a keyword table.
pub fn known_departments() -> Vec<&'static str> {
    TABLES.iter().map(|t| t.department).collect()
}
