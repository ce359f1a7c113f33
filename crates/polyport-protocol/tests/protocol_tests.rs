//! Protocol layer tests — wire shapes, status codes, method parsing, payload validation.

#[cfg(test)]
mod tests {
    use serde_json::json;
    use polyport_protocol::*;

    // ─────────────────────────────────────────────────────────────────────
    // Request
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn request_deserialized_from_wire_format() {
        // Exactly what a line-oriented client sends
        let wire = r#"{"method":"POST","path":"/messages","data":{"user":"alice","message":"hi"}}"#;
        let req: Request = serde_json::from_str(wire).unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/messages");
        assert_eq!(req.data["user"], "alice");
    }

    #[test]
    fn request_path_and_data_are_optional() {
        let req: Request = serde_json::from_value(json!({"method": "GET"})).unwrap();
        assert_eq!(req.path, "");
        assert!(req.data.is_null());
    }

    #[test]
    fn request_without_method_is_rejected() {
        let result: Result<Request, _> = serde_json::from_value(json!({"data": {}}));
        assert!(result.is_err());
    }

    // ─────────────────────────────────────────────────────────────────────
    // Response
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn ok_response_omits_error() {
        let resp = Response::ok(Some(json!({"id": 1})));
        assert!(resp.is_success());

        let parsed = serde_json::to_value(&resp).unwrap();
        assert_eq!(parsed["status"], 200);
        assert_eq!(parsed["data"]["id"], 1);
        assert!(parsed.get("error").is_none());
    }

    #[test]
    fn ok_response_without_data_is_bare_status() {
        let wire = serde_json::to_string(&Response::ok(None)).unwrap();
        assert_eq!(wire, r#"{"status":200}"#);
    }

    #[test]
    fn error_response_carries_message() {
        let resp = Response::error(&ProtocolError::method_not_allowed("PATCH"));
        assert!(!resp.is_success());
        assert_eq!(resp.status_code(), StatusCode::MethodNotAllowed);

        let parsed = serde_json::to_value(&resp).unwrap();
        assert_eq!(parsed["status"], 405);
        assert!(parsed["error"].as_str().unwrap().contains("PATCH"));
        assert!(parsed.get("data").is_none());
    }

    #[test]
    fn response_from_handler_result() {
        let ok: Response = HandlerResult::Ok(None).into();
        assert_eq!(ok.status, 200);

        let err: Response = HandlerResult::Err(ProtocolError::bad_request("nope")).into();
        assert_eq!(err.status, 400);
        assert_eq!(err.error.as_deref(), Some("nope"));
    }

    // ─────────────────────────────────────────────────────────────────────
    // StatusCode / ProtocolError
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn status_codes_round_trip_through_numbers() {
        for status in [
            StatusCode::Ok,
            StatusCode::BadRequest,
            StatusCode::NotFound,
            StatusCode::MethodNotAllowed,
            StatusCode::PayloadTooLarge,
            StatusCode::InternalError,
            StatusCode::ServiceUnavailable,
        ] {
            assert_eq!(StatusCode::from_code(status.code()), status);
        }
        assert_eq!(StatusCode::from_code(418), StatusCode::Custom(418));
    }

    #[test]
    fn client_error_range() {
        assert!(StatusCode::BadRequest.is_client_error());
        assert!(StatusCode::PayloadTooLarge.is_client_error());
        assert!(!StatusCode::Ok.is_client_error());
        assert!(!StatusCode::InternalError.is_client_error());
    }

    #[test]
    fn protocol_error_display() {
        let err = ProtocolError::bad_request("Invalid JSON");
        assert_eq!(err.to_string(), "Protocol Error [400]: Invalid JSON");
        assert_eq!(err.status_code(), StatusCode::BadRequest);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Method
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn method_parsing_is_case_insensitive() {
        assert_eq!("join".parse::<Method>().unwrap(), Method::Join);
        assert_eq!("Leave".parse::<Method>().unwrap(), Method::Leave);
        assert_eq!("POST".parse::<Method>().unwrap(), Method::Post);
        assert_eq!(" get ".parse::<Method>().unwrap(), Method::Get);
    }

    #[test]
    fn unknown_method_is_405() {
        let err = "DELETE".parse::<Method>().unwrap_err();
        assert_eq!(err.status, 405);
    }

    #[test]
    fn method_display_matches_wire_constant() {
        assert_eq!(Method::Post.to_string(), Methods::POST);
        assert_eq!(Method::Join.as_str(), "JOIN");
    }

    // ─────────────────────────────────────────────────────────────────────
    // Chat payloads
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn post_params_require_user_and_message() {
        let p: PostParams = serde_json::from_value(json!({"user": "alice", "message": "hi"})).unwrap();
        assert_eq!(p.require().unwrap(), ("alice", "hi"));
        assert!(p.room().is_none());

        let p: PostParams = serde_json::from_value(json!({"message": "hi"})).unwrap();
        let err = p.require().unwrap_err();
        assert_eq!(err.status, 400);
        assert!(err.message.contains("user"));

        let p: PostParams = serde_json::from_value(json!({"user": "alice", "message": "   "})).unwrap();
        assert!(p.require().unwrap_err().message.contains("message"));
    }

    #[test]
    fn blank_room_counts_as_none() {
        let p: RoomParams = serde_json::from_value(json!({"room": ""})).unwrap();
        assert!(p.room().is_none());
        let p: RoomParams = serde_json::from_value(json!({"room": "general"})).unwrap();
        assert_eq!(p.room(), Some("general"));
    }

    #[test]
    fn chat_message_wire_shape() {
        let msg = ChatMessage {
            id: 7,
            user: "alice".into(),
            message: "hi".into(),
            timestamp: chrono::Utc::now(),
            room: None,
        };
        let parsed = serde_json::to_value(&msg).unwrap();
        assert_eq!(parsed["user"], "alice");
        assert_eq!(parsed["message"], "hi");
        assert!(parsed.get("room").is_none());
        assert!(parsed.get("status").is_none()); // broadcasts never look like responses
    }
}
