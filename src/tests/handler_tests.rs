//! tests/handler_tests.rs
//! Rutas HTTP de `/api/bulk` con la app completa montada en memoria.

#[cfg(test)]
mod tests {
    use actix_rt::test;
    use actix_web::http::{header, StatusCode};
    use actix_web::{test as atest, web, App};
    use serde_json::{json, Value};

    use crate::app::init_app;
    use crate::handlers::auth::USER_ID_HEADER;
    use crate::models::operation_model::OperationStatus;
    use crate::models::user_model::Role;
    use crate::tests::support::{wait_for_terminal, TestContext, MISSING_ID};

    macro_rules! app {
        ($ctx:expr) => {
            atest::init_service(
                App::new()
                    .app_data(web::Data::new($ctx.bulk.clone()))
                    .app_data(web::Data::new($ctx.config.clone()))
                    .configure(init_app),
            )
            .await
        };
    }

    const BOUNDARY: &str = "----bulk-test-boundary";

    fn multipart_body(file_name: &str, content_type: &str, data: &str) -> Vec<u8> {
        format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
             Content-Type: {content_type}\r\n\r\n\
             {data}\r\n\
             --{BOUNDARY}--\r\n"
        )
        .into_bytes()
    }

    #[test]
    async fn requests_need_an_admin() {
        let ctx = TestContext::new().await;
        let mentee = ctx
            .seed_user("Ana", "Lopez", "ana@example.com", &[Role::Mentee])
            .await;
        let app = app!(ctx);

        let req = atest::TestRequest::get().uri("/api/bulk/operations").to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = atest::TestRequest::get()
            .uri("/api/bulk/operations")
            .insert_header((USER_ID_HEADER, MISSING_ID))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = atest::TestRequest::get()
            .uri("/api/bulk/operations")
            .insert_header((USER_ID_HEADER, mentee.id.as_str()))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let body: Value = atest::read_body_json(resp).await;
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["message"], json!("Admin access required"));
    }

    #[test]
    async fn multipart_import_queues_and_completes() {
        let ctx = TestContext::new().await;
        let app = app!(ctx);

        let csv = "firstName,lastName,email\nAna,Lopez,ana@example.com\n";
        let req = atest::TestRequest::post()
            .uri("/api/bulk/import")
            .insert_header((USER_ID_HEADER, ctx.admin.id.as_str()))
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            ))
            .set_payload(multipart_body("users.csv", "text/csv", csv))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = atest::read_body_json(resp).await;
        assert_eq!(body["success"], json!(true));
        assert_eq!(
            body["message"],
            json!("File upload successful. Import process started.")
        );
        let op_id = body["data"]["operationId"].as_str().unwrap().to_string();
        assert!(op_id.starts_with("op_"));

        let record = wait_for_terminal(&ctx.bulk, &op_id).await;
        assert_eq!(record.status, OperationStatus::Completed);
        assert_eq!(record.progress.successful, 1);
        assert!(record.files.input.ends_with("users.csv"));

        let req = atest::TestRequest::get()
            .uri(&format!("/api/bulk/operations/{op_id}"))
            .insert_header((USER_ID_HEADER, ctx.admin.id.as_str()))
            .to_request();
        let body: Value = atest::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["operation"]["type"], json!("import"));
        assert_eq!(body["data"]["operation"]["status"], json!("completed"));
        assert_eq!(body["data"]["operation"]["progress"]["total"], json!(1));
    }

    #[test]
    async fn import_rejects_non_csv_upload() {
        let ctx = TestContext::new().await;
        let app = app!(ctx);

        let req = atest::TestRequest::post()
            .uri("/api/bulk/import")
            .insert_header((USER_ID_HEADER, ctx.admin.id.as_str()))
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            ))
            .set_payload(multipart_body("notes.txt", "text/plain", "hello"))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = atest::read_body_json(resp).await;
        assert_eq!(body["error"], json!("Only CSV files are allowed"));
    }

    #[test]
    async fn invalid_update_is_rejected_without_a_record() {
        let ctx = TestContext::new().await;
        let app = app!(ctx);

        let req = atest::TestRequest::put()
            .uri("/api/bulk/update")
            .insert_header((USER_ID_HEADER, ctx.admin.id.as_str()))
            .set_json(json!({ "userIds": ["123"], "updates": { "status": "active" } }))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = atest::TestRequest::get()
            .uri("/api/bulk/operations?page=1&limit=5")
            .insert_header((USER_ID_HEADER, ctx.admin.id.as_str()))
            .to_request();
        let body: Value = atest::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["pagination"]["total"], json!(0));
        assert_eq!(body["data"]["pagination"]["limit"], json!(5));
    }

    #[test]
    async fn unknown_operation_is_404() {
        let ctx = TestContext::new().await;
        let app = app!(ctx);

        let req = atest::TestRequest::get()
            .uri("/api/bulk/operations/op_0_unknown00")
            .insert_header((USER_ID_HEADER, ctx.admin.id.as_str()))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: Value = atest::read_body_json(resp).await;
        assert_eq!(body["success"], json!(false));
    }

    #[test]
    async fn export_can_be_downloaded() {
        let ctx = TestContext::new().await;
        ctx.seed_user("Ana", "Lopez", "ana@example.com", &[Role::Mentee])
            .await;
        let app = app!(ctx);

        let req = atest::TestRequest::post()
            .uri("/api/bulk/export")
            .insert_header((USER_ID_HEADER, ctx.admin.id.as_str()))
            .set_json(json!({ "filters": { "search": "lopez" }, "fields": ["email", "lastName"] }))
            .to_request();
        let body: Value = atest::call_and_read_body_json(&app, req).await;
        assert_eq!(body["message"], json!("Export process started."));
        let op_id = body["data"]["operationId"].as_str().unwrap().to_string();
        wait_for_terminal(&ctx.bulk, &op_id).await;

        let req = atest::TestRequest::get()
            .uri(&format!("/api/bulk/download/{op_id}"))
            .insert_header((USER_ID_HEADER, ctx.admin.id.as_str()))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let disposition = resp
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(disposition.starts_with("attachment"));
        assert!(disposition.contains(&format!("users_export_{op_id}.csv")));

        let bytes = atest::read_body(resp).await;
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            "email,lastName\nana@example.com,Lopez\n"
        );
    }

    #[test]
    async fn download_and_cancel_conflicts_are_409() {
        let ctx = TestContext::new().await;
        let user = ctx
            .seed_user("Ana", "Lopez", "ana@example.com", &[Role::Mentee])
            .await;
        let app = app!(ctx);

        let req = atest::TestRequest::post()
            .uri("/api/bulk/delete")
            .insert_header((USER_ID_HEADER, ctx.admin.id.as_str()))
            .set_json(json!({ "userIds": [user.id] }))
            .to_request();
        let body: Value = atest::call_and_read_body_json(&app, req).await;
        let op_id = body["data"]["operationId"].as_str().unwrap().to_string();
        wait_for_terminal(&ctx.bulk, &op_id).await;

        let req = atest::TestRequest::get()
            .uri(&format!("/api/bulk/download/{op_id}"))
            .insert_header((USER_ID_HEADER, ctx.admin.id.as_str()))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let req = atest::TestRequest::post()
            .uri(&format!("/api/bulk/operations/{op_id}/cancel"))
            .insert_header((USER_ID_HEADER, ctx.admin.id.as_str()))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[test]
    async fn audit_history_lists_bulk_changes() {
        let ctx = TestContext::new().await;
        let user = ctx
            .seed_user("Ana", "Lopez", "ana@example.com", &[Role::Mentee])
            .await;
        let app = app!(ctx);

        let req = atest::TestRequest::post()
            .uri("/api/bulk/email")
            .insert_header((USER_ID_HEADER, ctx.admin.id.as_str()))
            .set_json(json!({ "recipients": [user.id], "subject": "s", "message": "m" }))
            .to_request();
        let body: Value = atest::call_and_read_body_json(&app, req).await;
        assert_eq!(body["message"], json!("Bulk email process started."));
        let op_id = body["data"]["operationId"].as_str().unwrap().to_string();
        wait_for_terminal(&ctx.bulk, &op_id).await;

        let req = atest::TestRequest::put()
            .uri("/api/bulk/update")
            .insert_header((USER_ID_HEADER, ctx.admin.id.as_str()))
            .set_json(json!({ "userIds": [user.id], "updates": { "status": "inactive" } }))
            .to_request();
        let body: Value = atest::call_and_read_body_json(&app, req).await;
        let op_id = body["data"]["operationId"].as_str().unwrap().to_string();
        wait_for_terminal(&ctx.bulk, &op_id).await;

        let req = atest::TestRequest::get()
            .uri(&format!("/api/bulk/audit/{}", user.id))
            .insert_header((USER_ID_HEADER, ctx.admin.id.as_str()))
            .to_request();
        let body: Value = atest::call_and_read_body_json(&app, req).await;
        let activities = body["data"]["activities"].as_array().unwrap();
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0]["action"], json!("user_updated"));
        assert_eq!(activities[0]["performedBy"], json!(ctx.admin.id));
        assert_eq!(ctx.sink.sent().len(), 1);
    }

    #[test]
    async fn truncated_export_body_is_rejected_without_a_record() {
        let ctx = TestContext::new().await;
        ctx.seed_user("Ana", "Lopez", "ana@example.com", &[Role::Mentor])
            .await;
        let app = app!(ctx);

        let req = atest::TestRequest::post()
            .uri("/api/bulk/export")
            .insert_header((USER_ID_HEADER, ctx.admin.id.as_str()))
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .set_payload(r#"{"fields": ["email"], "filters": {"roles": ["mentor"]"#)
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = atest::read_body_json(resp).await;
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["message"], json!("Validation error"));
        assert!(body["error"]
            .as_str()
            .unwrap()
            .starts_with("Invalid JSON body"));

        let req = atest::TestRequest::get()
            .uri("/api/bulk/operations")
            .insert_header((USER_ID_HEADER, ctx.admin.id.as_str()))
            .to_request();
        let body: Value = atest::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["pagination"]["total"], json!(0));
    }

    #[test]
    async fn malformed_json_bodies_use_the_error_envelope() {
        let ctx = TestContext::new().await;
        let app = app!(ctx);

        let cases = [
            (atest::TestRequest::put(), "/api/bulk/update", "{\"userIds\": ["),
            (atest::TestRequest::post(), "/api/bulk/delete", "userIds"),
            (atest::TestRequest::post(), "/api/bulk/email", "{\"subject\": }"),
        ];
        for (builder, uri, payload) in cases {
            let req = builder
                .uri(uri)
                .insert_header((USER_ID_HEADER, ctx.admin.id.as_str()))
                .insert_header((header::CONTENT_TYPE, "application/json"))
                .set_payload(payload)
                .to_request();
            let resp = atest::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{uri}");
            let body: Value = atest::read_body_json(resp).await;
            assert_eq!(body["success"], json!(false), "{uri}");
            assert_eq!(body["message"], json!("Validation error"), "{uri}");
            assert!(
                body["error"].as_str().unwrap().contains("Invalid JSON body"),
                "{uri}: {body}"
            );
        }
    }

    #[test]
    async fn empty_export_body_exports_everything() {
        let ctx = TestContext::new().await;
        let app = app!(ctx);

        let req = atest::TestRequest::post()
            .uri("/api/bulk/export")
            .insert_header((USER_ID_HEADER, ctx.admin.id.as_str()))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = atest::read_body_json(resp).await;
        let op_id = body["data"]["operationId"].as_str().unwrap().to_string();

        let record = wait_for_terminal(&ctx.bulk, &op_id).await;
        assert_eq!(record.status, OperationStatus::Completed);
        assert_eq!(record.progress.total, 1);
    }

    #[test]
    async fn uppercase_admin_header_is_accepted() {
        let ctx = TestContext::new().await;
        let app = app!(ctx);

        let req = atest::TestRequest::get()
            .uri("/api/bulk/operations")
            .insert_header((USER_ID_HEADER, ctx.admin.id.to_ascii_uppercase()))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    async fn operation_details_include_the_initiator() {
        let ctx = TestContext::new().await;
        let app = app!(ctx);

        let req = atest::TestRequest::post()
            .uri("/api/bulk/delete")
            .insert_header((USER_ID_HEADER, ctx.admin.id.as_str()))
            .set_json(json!({ "userIds": [MISSING_ID] }))
            .to_request();
        let body: Value = atest::call_and_read_body_json(&app, req).await;
        let op_id = body["data"]["operationId"].as_str().unwrap().to_string();
        wait_for_terminal(&ctx.bulk, &op_id).await;

        let req = atest::TestRequest::get()
            .uri(&format!("/api/bulk/operations/{op_id}"))
            .insert_header((USER_ID_HEADER, ctx.admin.id.as_str()))
            .to_request();
        let body: Value = atest::call_and_read_body_json(&app, req).await;
        let operation = &body["data"]["operation"];
        assert_eq!(operation["initiatedBy"], json!(ctx.admin.id));
        assert_eq!(operation["initiator"]["firstName"], json!("Ada"));
        assert_eq!(operation["initiator"]["email"], json!("admin@skillconnect.com"));

        let req = atest::TestRequest::get()
            .uri("/api/bulk/operations")
            .insert_header((USER_ID_HEADER, ctx.admin.id.as_str()))
            .to_request();
        let body: Value = atest::call_and_read_body_json(&app, req).await;
        assert_eq!(
            body["data"]["operations"][0]["initiator"]["lastName"],
            json!("Admin")
        );
    }
}
