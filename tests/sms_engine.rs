//! SMS retrieval against a scripted modem: dedup, delete-then-reread and the delete guard.
use smsgate::modem::mock::{listing_reply, read_reply, ScriptedTransport, ERROR_REPLY, OK_REPLY};
use smsgate::modem::{CommandSession, CommandTiming};
use smsgate::sms::{Bank, DedupKey, DeleteOutcome, DisableReason, SmsEngine, SmsSettings};

fn session() -> (CommandSession, smsgate::modem::mock::ScriptHandle) {
    let (transport, handle) = ScriptedTransport::modem();
    (
        CommandSession::new("modem-a", Box::new(transport), CommandTiming::instant()),
        handle,
    )
}

#[tokio::test]
async fn two_messages_forwarded_once_and_deleted() {
    let (mut session, modem) = session();
    modem.respond("AT+CMGL=\"ALL\"", &listing_reply(&[0, 2]));
    modem.respond(
        "AT+CMGR=0",
        &read_reply("+61412345678", "25/10/25,19:33:13+44", "Hello"),
    );
    modem.respond(
        "AT+CMGR=2",
        &read_reply("+61498765432", "25/10/25,19:35:00+44", "World"),
    );
    modem.respond("AT+CMGD=0,0", OK_REPLY);
    modem.respond("AT+CMGD=2,0", OK_REPLY);

    let mut engine = SmsEngine::new("modem-a", SmsSettings::default());
    let first = engine.poll(&mut session).await.unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].sender, "+61412345678");
    assert_eq!(first[0].text, "Hello");
    assert_eq!(first[1].key().to_string(), "ME_2");

    // Same listing again: nothing new, no extra reads
    let again = engine.poll(&mut session).await.unwrap();
    assert!(again.is_empty());
    assert_eq!(modem.count("AT+CMGR=0"), 1);
    assert_eq!(modem.count("AT+CMGR=2"), 1);

    for message in &first {
        let outcome = engine.delete(&mut session, message.key()).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::Deleted);
    }
    assert!(engine.processed().is_empty());
    assert!(modem.commands().contains(&"AT+CMGD=0,0".to_string()));
    assert!(modem.commands().contains(&"AT+CMGD=2,0".to_string()));

    // Storage reuses slot 0 for a new message after the delete
    modem.respond("AT+CMGL=\"ALL\"", &listing_reply(&[0]));
    modem.respond(
        "AT+CMGR=0",
        &read_reply("+61400000000", "25/10/25,20:00:00+44", "Next"),
    );
    let reused = engine.poll(&mut session).await.unwrap();
    assert_eq!(reused.len(), 1);
    assert_eq!(reused[0].text, "Next");
}

#[tokio::test]
async fn failing_deletes_disable_deletion_for_good() {
    let (mut session, modem) = session();
    modem.respond("AT+CMGD=1,0", ERROR_REPLY);
    let settings = SmsSettings {
        delete_failure_threshold: 3,
        ..SmsSettings::default()
    };
    let mut engine = SmsEngine::new("modem-a", settings);
    let key = DedupKey {
        bank: Bank::Device,
        index: 1,
    };

    for _ in 0..3 {
        assert_eq!(
            engine.delete(&mut session, key).await.unwrap(),
            DeleteOutcome::Failed
        );
    }
    assert!(!engine.deletion_enabled());
    assert_eq!(
        engine.take_disable_notice(),
        Some(DisableReason::ConsecutiveFailures(3))
    );
    assert_eq!(engine.take_disable_notice(), None);

    // A later success cannot re-enable it, and the modem is no longer asked
    modem.respond("AT+CMGD=1,0", OK_REPLY);
    modem.clear_history();
    assert_eq!(
        engine.delete(&mut session, key).await.unwrap(),
        DeleteOutcome::Disabled
    );
    assert!(modem.commands().is_empty());
    assert!(!engine.deletion_enabled());
}

#[tokio::test]
async fn sim_bank_is_polled_after_device_bank() {
    let (mut session, modem) = session();
    modem.respond("AT+CMGL=\"ALL\"", &listing_reply(&[4]));
    modem.respond(
        "AT+CMGR=4",
        &read_reply("+15550001", "25/01/02,03:04:05+00", "hi"),
    );
    let settings = SmsSettings {
        banks: vec![Bank::Device, Bank::Sim],
        ..SmsSettings::default()
    };
    let mut engine = SmsEngine::new("modem-a", settings);

    let messages = engine.poll(&mut session).await.unwrap();
    let keys: Vec<String> = messages.iter().map(|m| m.key().to_string()).collect();
    assert_eq!(keys, vec!["ME_4", "SM_4"]);

    let selects: Vec<String> = modem
        .commands()
        .into_iter()
        .filter(|c| c.starts_with("AT+CPMS"))
        .collect();
    assert_eq!(selects, vec!["AT+CPMS=\"ME\"", "AT+CPMS=\"SM\""]);
}
