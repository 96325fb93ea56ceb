//! 展示协作方
//!
//! 引擎只通过 `RevealSink::reveal` 把到期批注交给 UI，
//! 同一会话内按 at 非降序、每个 id 恰好一次。

use std::fmt;

use crate::annotation::Annotation;
use crate::utils::PlaybackOffset;

/// 批注展示回调
pub trait RevealSink: Send + Sync {
    fn reveal(&self, annotation: &Annotation);
}

impl<F> RevealSink for F
where
    F: Fn(&Annotation) + Send + Sync,
{
    fn reveal(&self, annotation: &Annotation) {
        self(annotation)
    }
}

/// 一条已展示批注的显示模型
///
/// 不做 HTML 转义，由具体 UI 层负责。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationLine {
    pub id: u64,
    /// `[mm:ss]` 中的时间标签
    pub timestamp_label: String,
    pub username: String,
    pub body: String,
    /// 点击后跳转的位置（毫秒）
    pub seek_at: u64,
}

impl From<&Annotation> for AnnotationLine {
    fn from(annotation: &Annotation) -> Self {
        Self {
            id: annotation.id,
            timestamp_label: PlaybackOffset(annotation.at).to_string(),
            username: annotation.author.username.clone(),
            body: annotation.body.clone(),
            seek_at: annotation.at,
        }
    }
}

impl fmt::Display for AnnotationLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.timestamp_label, self.username, self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::Author;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_annotation_line() {
        let annotation = Annotation::new(4, 83_000, "great shot", Author::new("chris"));
        let line = AnnotationLine::from(&annotation);

        assert_eq!(line.timestamp_label, "01:23");
        assert_eq!(line.seek_at, 83_000);
        assert_eq!(line.to_string(), "[01:23] chris: great shot");
    }

    #[test]
    fn test_closure_is_reveal_sink() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let captured = lines.clone();
        let sink = move |annotation: &Annotation| captured.lock().push(AnnotationLine::from(annotation));

        sink.reveal(&Annotation::new(1, 0, "<b>hi</b>", Author::new("a")));
        assert_eq!(lines.lock()[0].body, "<b>hi</b>");
    }
}
