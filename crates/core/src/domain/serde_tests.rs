#[cfg(test)]
mod tests {
    use crate::domain::error::{AppError, ErrorCode};
    use crate::domain::event::{JobEvent, TranscriptionOutput};
    use crate::domain::job::{JobPriority, JobStatus, RetryMode, TranscriptSegment};

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Pending).unwrap(),
            "\"pending\""
        );
        assert_eq!(
            serde_json::to_string(&JobStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
        assert_eq!(
            serde_json::from_str::<JobStatus>("\"paused\"").unwrap(),
            JobStatus::Paused
        );
    }

    #[test]
    fn test_priority_serialization() {
        assert_eq!(
            serde_json::to_string(&JobPriority::High).unwrap(),
            "\"high\""
        );
        assert_eq!(
            serde_json::from_str::<JobPriority>("\"low\"").unwrap(),
            JobPriority::Low
        );
    }

    #[test]
    fn test_retry_mode_serialization() {
        assert_eq!(
            serde_json::to_string(&RetryMode::Resume).unwrap(),
            "\"resume\""
        );
    }

    #[test]
    fn test_error_code_serialization() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::NotFound).unwrap(),
            "\"E_NOT_FOUND\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::InvalidState).unwrap(),
            "\"E_INVALID_STATE\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::Shutdown).unwrap(),
            "\"E_SHUTDOWN\""
        );
    }

    #[test]
    fn test_app_error_serialization() {
        let err = AppError::invalid_state("テスト");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("E_INVALID_STATE"));
        assert!(json.contains("recoverable"));
    }

    #[test]
    fn test_job_event_tagging() {
        let event = JobEvent::Paused {
            job_id: "file_1".to_string(),
            chunk_index: 1,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"paused\""));
        assert!(json.contains("\"chunk_index\":1"));
        assert_eq!(event.job_id(), "file_1");
    }

    #[test]
    fn test_completed_event_carries_segments() {
        let event = JobEvent::Completed {
            job_id: "file_2".to_string(),
            text: "hello world".to_string(),
            result: TranscriptionOutput {
                text: "hello world".to_string(),
                language: Some("en".to_string()),
                segments: vec![TranscriptSegment {
                    start: 30.0,
                    end: 31.5,
                    text: "hello".to_string(),
                }],
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("completed"));
        assert!(json.contains("31.5"));
    }
}
