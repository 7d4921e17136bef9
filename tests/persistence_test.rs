#![cfg(feature = "storage-rocksdb")]

mod common;

use common::*;
use payguard::application::{Backends, Services};
use payguard::domain::audit::{RequestContext, VerificationOutcome};
use payguard::domain::payment::ApprovalState;
use rust_decimal_macros::dec;
use tempfile::tempdir;

fn open(path: &std::path::Path) -> Services {
    let config = default_config();
    let backends = Backends::rocksdb(&config, path).unwrap();
    Services::assemble(&config, backends).unwrap()
}

#[tokio::test]
async fn test_rocksdb_persistence_recovery() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    // 1. First run: create, submit, review and verify a payment
    let (id, token, code) = {
        let services = open(&db_path);
        let payment = services
            .workflow
            .create_payment(new_payment(dec!(1200.50)))
            .await
            .unwrap();
        services
            .workflow
            .submit_for_review(payment.id, &clerk(), None)
            .await
            .unwrap();
        services
            .workflow
            .review(payment.id, &reviewer(), Some("matches invoice".into()))
            .await
            .unwrap();
        let token = services.tokens.issue_token(payment.id).await.unwrap().token;
        let code = services
            .verification
            .verify(&token, RequestContext::default())
            .await
            .code
            .unwrap();
        (payment.id, token, code)
    };

    // 2. Second run: everything survives and numbering continues
    let services = open(&db_path);
    let payment = services.workflow.get_payment(id).await.unwrap();
    assert_eq!(payment.approval_state, ApprovalState::ForApproval);
    assert_eq!(payment.verification_token.as_deref(), Some(token.as_str()));
    assert_eq!(payment.access_count, 1);
    assert_eq!(payment.reviewed_by.as_deref(), Some("rita"));

    let history = services.audit.history(id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].comment.as_deref(), Some("matches invoice"));

    let record = services.audit.verification_record(&code).await.unwrap();
    assert_eq!(record.outcome, VerificationOutcome::Success);

    let second = services
        .workflow
        .create_payment(new_payment(dec!(5)))
        .await
        .unwrap();
    assert_eq!(second.voucher_number.as_str(), "PV/00002");

    let next_code = services
        .verification
        .verify(&token, RequestContext::default())
        .await
        .code
        .unwrap();
    assert_ne!(next_code, code);
    assert_eq!(services.tokens.issue_token(id).await.unwrap().token, token);
}
