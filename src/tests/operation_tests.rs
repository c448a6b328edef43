//! tests/operation_tests.rs
//! Ciclo de vida del registro de operaciones.

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use crate::models::operation_model::{
        CreateOperationRequest, OperationFiles, OperationResults, OperationStatus, OperationType,
        Progress,
    };
    use crate::services::operation_service::{generate_operation_id, OperationService};
    use crate::tests::support::memory_pool;

    async fn service() -> OperationService {
        let service = OperationService::new(memory_pool().await);
        service.run_migrations().await.unwrap();
        service
    }

    fn export_request() -> CreateOperationRequest {
        CreateOperationRequest {
            operation_type: OperationType::Export,
            initiated_by: "65f0c0ffee0000000000abcd".to_string(),
            parameters: json!({ "fields": ["email"] }),
            files: OperationFiles::default(),
        }
    }

    #[test]
    fn operation_ids_have_expected_shape() {
        let now = Utc::now();
        let id = generate_operation_id(&now);
        let parts: Vec<&str> = id.split('_').collect();

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "op");
        assert_eq!(parts[1], now.timestamp_millis().to_string());
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2]
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert_ne!(id, generate_operation_id(&now));
    }

    #[actix_rt::test]
    async fn new_operation_starts_pending_and_round_trips() {
        let ops = service().await;
        let created = ops.create_operation(export_request()).await.unwrap();
        assert_eq!(created.status, OperationStatus::Pending);

        let loaded = ops.get_operation(&created.operation_id).await.unwrap().unwrap();
        assert_eq!(loaded.operation_type, OperationType::Export);
        assert_eq!(loaded.status, OperationStatus::Pending);
        assert_eq!(loaded.parameters, json!({ "fields": ["email"] }));
        assert_eq!(loaded.progress, Progress::default());
        assert_eq!(loaded.results, OperationResults::default());
        assert!(loaded.start_time.is_none());
        assert_eq!(
            loaded.created_at.timestamp_micros(),
            created.created_at.timestamp_micros()
        );

        assert!(ops.get_operation("op_1_nothere00").await.unwrap().is_none());
    }

    #[actix_rt::test]
    async fn status_only_moves_forward() {
        let ops = service().await;
        let op = ops.create_operation(export_request()).await.unwrap();
        let id = op.operation_id.as_str();
        let progress = Progress {
            total: 2,
            processed: 1,
            successful: 1,
            failed: 0,
        };

        // Sin pasar a processing no se aceptan contadores
        assert!(!ops.record_progress(id, &progress).await.unwrap());

        assert!(ops.mark_processing(id).await.unwrap());
        assert!(!ops.mark_processing(id).await.unwrap());
        assert!(ops.record_progress(id, &progress).await.unwrap());

        let done = Progress {
            processed: 2,
            successful: 2,
            ..progress
        };
        assert!(ops
            .finish_operation(
                id,
                OperationStatus::Completed,
                &done,
                &OperationResults::default(),
                Some("out.csv"),
            )
            .await
            .unwrap());

        // Terminal: nada lo vuelve a abrir
        assert!(!ops.record_progress(id, &progress).await.unwrap());
        assert!(!ops.mark_operation_failed(id, "late").await.unwrap());
        assert!(!ops.cancel_pending(id).await.unwrap());
        assert!(ops
            .finish_operation(
                id,
                OperationStatus::Processing,
                &done,
                &OperationResults::default(),
                None,
            )
            .await
            .is_err());

        let record = ops.get_operation(id).await.unwrap().unwrap();
        assert_eq!(record.status, OperationStatus::Completed);
        assert_eq!(record.progress, done);
        assert_eq!(record.files.output, "out.csv");
        assert!(record.start_time.is_some());
        assert!(record.end_time.unwrap() >= record.start_time.unwrap());
    }

    #[actix_rt::test]
    async fn failure_keeps_progress_and_records_error() {
        let ops = service().await;
        let op = ops.create_operation(export_request()).await.unwrap();
        let id = op.operation_id.as_str();
        let progress = Progress {
            total: 5,
            processed: 2,
            successful: 1,
            failed: 1,
        };

        ops.mark_processing(id).await.unwrap();
        ops.record_progress(id, &progress).await.unwrap();
        assert!(ops.mark_operation_failed(id, "disk full").await.unwrap());

        let record = ops.get_operation(id).await.unwrap().unwrap();
        assert_eq!(record.status, OperationStatus::Failed);
        assert_eq!(record.progress, progress);
        assert_eq!(record.results.summary["error"], json!("disk full"));
    }
}
