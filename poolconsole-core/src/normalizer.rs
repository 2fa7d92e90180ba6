use crate::error::{ConsoleError, CoreResult};
use crate::model::{CompletionRequest, TargetMode};
use unicode_normalization::UnicodeNormalization;

fn clean_text(s: &str) -> String {
    // Unicode NFC normalization + BOM strip + CRLF -> LF + trim
    let mut t = s.nfc().collect::<String>();
    if t.starts_with('\u{FEFF}') {
        t.remove(0);
    }
    if t.contains("\r\n") {
        t = t.replace("\r\n", "\n");
    }
    t.trim().to_string()
}

/// Clean the message text and account selector before anything is sent.
pub fn normalize_request(mut req: CompletionRequest) -> CoreResult<CompletionRequest> {
    req.message = clean_text(&req.message);
    if req.message.is_empty() {
        return Err(ConsoleError::Validation("message must not be empty".into()));
    }
    if let TargetMode::AccountScoped { identifier } = &mut req.target {
        *identifier = identifier.trim().to_string();
    }
    if req.api_key.as_ref().is_some_and(|k| k.is_empty()) {
        req.api_key = None;
    }
    Ok(req)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ApiKey, ModelId};

    #[test]
    fn trims_message_and_identifier() {
        let req =
            CompletionRequest::for_account(ModelId::Chat, "  Hello world   ", " a@example.com ");
        let out = normalize_request(req).unwrap();
        assert_eq!(out.message, "Hello world");
        assert_eq!(
            out.target,
            TargetMode::AccountScoped {
                identifier: "a@example.com".into()
            }
        );
    }

    #[test]
    fn blank_message_is_rejected() {
        let err =
            normalize_request(CompletionRequest::direct(ModelId::Chat, " \r\n ")).unwrap_err();
        assert!(matches!(err, ConsoleError::Validation(_)));
    }

    #[test]
    fn empty_explicit_key_falls_back_to_pool() {
        let req = CompletionRequest::direct(ModelId::Chat, "hi").with_api_key(ApiKey::new(""));
        assert!(normalize_request(req).unwrap().api_key.is_none());
    }

    #[test]
    fn unicode_nfc_bom_and_crlf_normalization() {
        let bom = CompletionRequest::direct(ModelId::Chat, "\u{FEFF}e\u{301}");
        let out = normalize_request(bom).unwrap();
        assert_eq!(out.message, "é");

        let crlf = CompletionRequest::direct(ModelId::Chat, "line1\r\nline2");
        let out2 = normalize_request(crlf).unwrap();
        assert_eq!(out2.message, "line1\nline2");
    }
}
