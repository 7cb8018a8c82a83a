mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio::sync::Barrier;

use common::{manager_with, single, tera, CountingRenderer, OrderShipped, Recorder, Veto, Welcome};
use mailwright::jobs::{JobRegistry, MemoryQueue, QueueManager};
use mailwright::mail::{
    locale, Address, AttachOptions, Attachment, Envelope, Events, Filesystems, Headers,
    MailConfig, MailDefinition, MailError, MailListener, MailManager, MailServices, Mailable,
    MailerConfig, MemoryDisk, MessageSending, QueuedMailableJob,
};

fn welcome(name: &str) -> Mailable<Welcome> {
    Mailable::new(Welcome { name: name.into() })
}

#[tokio::test]
async fn sending_twice_hydrates_independently() {
    let recorder = Recorder::ok("memory");
    let manager = manager_with(single(&recorder), MailServices::new(tera()), &[recorder.clone()]);
    let mailable = welcome("Jane").to("jane@example.com");

    let first = manager.send(&mailable).await.unwrap().unwrap();
    let second = manager.send(&mailable).await.unwrap().unwrap();

    assert_ne!(first.message_id(), second.message_id());
    let messages = recorder.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].html(), messages[1].html());
    assert_eq!(messages[0].html(), Some("<p>Hello Jane (en-US)</p>"));
    assert_eq!(messages[0].text(), Some("Hello Jane"));
    assert_eq!(messages[0].subject(), Some("Welcome, Jane"));
    assert_eq!(messages[0].from(), Some(&Address::with_name("shop@example.com", "Shop")));

    // The definition's view was merged into a clone, not the mailable itself.
    assert!(mailable.state().view.is_none());
    assert_eq!(mailable.state().to.len(), 1);
}

#[test]
fn repeated_recipients_keep_last_name_and_first_position() {
    let mailable = Mailable::new(())
        .to(("a@x.com", "A"))
        .to(("a@x.com", "A2"))
        .to("b@x.com")
        .to("");

    let to = mailable.state().to.as_slice();
    assert_eq!(to.len(), 2);
    assert!(to[0].is_identical(&Address::with_name("a@x.com", "A2")));
    assert!(to[1].is_identical(&Address::new("b@x.com")));
}

#[tokio::test]
async fn attachment_equivalence_ignores_how_it_was_built() {
    let storage = Filesystems::default();

    let renamed = Attachment::from_path("/tmp/f.pdf").with_name("r.pdf");
    let plain = Attachment::from_path("/tmp/f.pdf");
    assert!(plain
        .is_equivalent(&renamed, &AttachOptions::new().name("r.pdf"), &storage)
        .await
        .unwrap());
    assert!(!plain.is_equivalent(&renamed, &AttachOptions::new(), &storage).await.unwrap());

    let produced = Arc::new(AtomicUsize::new(0));
    let counter = produced.clone();
    let lazy = Attachment::from_data(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(b"%PDF".to_vec())
    })
    .with_name("r.pdf");
    let bytes = Attachment::from_bytes(b"%PDF".to_vec()).with_name("r.pdf");

    assert!(lazy.is_equivalent(&bytes, &AttachOptions::new(), &storage).await.unwrap());
    assert_eq!(produced.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn has_attachment_checks_state_and_definition() {
    let disk = MemoryDisk::new().put("invoices/1.pdf", b"%PDF".to_vec());
    let storage = Filesystems::default().disk_named("local", disk);
    let mailable = Mailable::new(())
        .attach_path("/tmp/report.pdf", AttachOptions::new().name("report-2024.pdf"))
        .attach_from_storage("invoices/1.pdf", None, AttachOptions::new());

    let report = Attachment::from_path("/tmp/report.pdf");
    assert!(mailable
        .has_attachment(&report, &AttachOptions::new().name("report-2024.pdf"), &storage)
        .await
        .unwrap());
    assert!(!mailable.has_attachment(&report, &AttachOptions::new(), &storage).await.unwrap());

    let invoice = Attachment::from_bytes(b"%PDF".to_vec())
        .with_name("1.pdf")
        .with_mime("application/pdf");
    assert!(mailable.has_attachment(&invoice, &AttachOptions::new(), &storage).await.unwrap());
}

#[tokio::test]
async fn locale_is_restored_after_a_failed_render() {
    let recorder = Recorder::ok("memory");
    let manager = manager_with(single(&recorder), MailServices::new(tera()), &[recorder.clone()]);
    let before = locale::current();

    let french = welcome("Jeanne").to("jeanne@example.com").locale("fr");
    manager.send(&french).await.unwrap();
    assert_eq!(recorder.last().html(), Some("<p>Hello Jeanne (fr)</p>"));
    assert_eq!(locale::current(), before);

    let broken = Mailable::new(()).to("x@example.com").locale("fr").view("broken.html", None);
    let err = manager.send(&broken).await.unwrap_err();
    assert!(matches!(err, MailError::Render { ref view, .. } if view == "broken.html"));
    assert_eq!(locale::current(), before);
    assert_eq!(recorder.calls(), 1);
}

/// Holds every message at the pre-send hook until `parties` sends are in flight, then
/// records the body it carries and the locale in effect after the wait.
#[derive(Clone)]
struct Rendezvous {
    barrier: Arc<Barrier>,
    seen: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl MailListener for Rendezvous {
    async fn sending(&self, event: &MessageSending<'_>) -> bool {
        self.barrier.wait().await;
        let html = event.message.html().unwrap_or_default().to_string();
        self.seen.lock().unwrap().push((html, locale::current()));
        true
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_sends_keep_their_own_locale() {
    let recorder = Recorder::ok("memory");
    let rendezvous = Rendezvous {
        barrier: Arc::new(Barrier::new(2)),
        seen: Arc::new(Mutex::new(Vec::new())),
    };
    let services = MailServices::new(tera()).with_events(Events::new().listen(rendezvous.clone()));
    let manager = manager_with(single(&recorder), services, &[recorder.clone()]);
    let before = locale::current();

    let french = welcome("Jeanne").to("jeanne@example.com").locale("fr");
    let german = welcome("Hans").to("hans@example.com").locale("de");
    let (first, second) = tokio::join!(manager.send(&french), manager.send(&german));
    first.unwrap();
    second.unwrap();

    let mut seen = rendezvous.seen.lock().unwrap().clone();
    seen.sort();
    assert_eq!(
        seen,
        vec![
            ("<p>Hello Hans (de)</p>".to_string(), "de".to_string()),
            ("<p>Hello Jeanne (fr)</p>".to_string(), "fr".to_string()),
        ]
    );
    assert_eq!(recorder.calls(), 2);
    assert_eq!(locale::current(), before);

    let (french, german) = (Arc::new(french), Arc::new(german));
    let manager = Arc::new(manager);
    let spawned = [("fr", french), ("de", german)].map(|(expected, mailable)| {
        let manager: Arc<MailManager> = manager.clone();
        tokio::spawn(async move {
            let html = manager.render(&*mailable).await.unwrap();
            (html.contains(&format!("({expected})")), locale::current())
        })
    });
    for handle in spawned {
        let (own_locale, after) = handle.await.unwrap();
        assert!(own_locale);
        assert_eq!(after, before);
    }
}

#[tokio::test]
async fn vetoed_message_never_reaches_the_transport() {
    let recorder = Recorder::ok("memory");
    let services = MailServices::new(tera()).with_events(Events::new().listen(Veto));
    let manager = manager_with(single(&recorder), services, &[recorder.clone()]);

    let sent = manager.send(&welcome("Jane").to("jane@example.com")).await.unwrap();

    assert!(sent.is_none());
    assert_eq!(recorder.calls(), 0);
}

#[tokio::test]
async fn failover_moves_on_to_the_next_member() {
    let broken = Recorder::failing("broken");
    let healthy = Recorder::ok("healthy");
    let config = MailConfig::new("main")
        .with_from("shop@example.com", None)
        .with_mailer("main", MailerConfig::failover(["first", "second"]))
        .with_mailer("first", MailerConfig::transport("broken"))
        .with_mailer("second", MailerConfig::transport("healthy"));
    let manager = manager_with(
        config,
        MailServices::new(tera()),
        &[broken.clone(), healthy.clone()],
    );

    let sent = manager.send(&welcome("Jane").to("jane@example.com")).await.unwrap().unwrap();

    assert_eq!(sent.transport(), "healthy");
    assert_eq!(broken.calls(), 1);
    assert_eq!(healthy.calls(), 1);
}

#[tokio::test]
async fn failover_reports_every_member_when_all_fail() {
    let first = Recorder::failing("first");
    let second = Recorder::failing("second");
    let config = MailConfig::new("main")
        .with_from("shop@example.com", None)
        .with_mailer("main", MailerConfig::failover(["a", "b"]))
        .with_mailer("a", MailerConfig::transport("first"))
        .with_mailer("b", MailerConfig::transport("second"));
    let manager = manager_with(config, MailServices::new(tera()), &[first.clone(), second.clone()]);

    let err = manager.send(&welcome("Jane").to("jane@example.com")).await.unwrap_err();

    let MailError::Transport { reason, .. } = err else {
        panic!("expected a transport error, got {err:?}");
    };
    assert!(reason.contains("first"));
    assert!(reason.contains("second"));
}

#[tokio::test]
async fn global_to_replaces_every_recipient() {
    let recorder = Recorder::ok("memory");
    let config = single(&recorder).with_to("debug@example.com", None);
    let manager = manager_with(config, MailServices::new(tera()), &[recorder.clone()]);

    let mailable = welcome("Jane").to("jane@example.com").cc("x@example.com").bcc("y@example.com");
    let sent = manager.send(&mailable).await.unwrap().unwrap();

    let message = recorder.last();
    assert_eq!(message.to(), &[Address::new("debug@example.com")]);
    assert!(message.cc().is_empty());
    assert!(message.bcc().is_empty());
    assert_eq!(sent.envelope().recipients(), &[Address::new("debug@example.com")]);
}

#[tokio::test]
async fn queued_mailables_are_sent_by_the_job() {
    let recorder = Recorder::ok("memory");
    let renderer = CountingRenderer::new();
    let renders = renderer.calls.clone();
    let queue = Arc::new(MemoryQueue::new());
    let services =
        MailServices::new(renderer).with_queues(QueueManager::new().channel("mail", queue.clone()));
    let manager = Arc::new(manager_with(single(&recorder), services, &[recorder.clone()]));

    let id = manager.queue(&welcome("Jane").to("jane@example.com"), None).await.unwrap();

    assert_eq!(renders.load(Ordering::SeqCst), 0);
    assert_eq!(recorder.calls(), 0);
    let entries = queue.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, id);
    assert_eq!(entries[0].job_type, Welcome::NAME);
    assert_eq!(entries[0].payload["mailable"]["state"]["mailer"], "main");

    let registry = JobRegistry::<MailManager>::new().register::<QueuedMailableJob<Welcome>>();
    let result = registry.perform(&entries[0], manager.clone()).await.unwrap().unwrap();

    assert_eq!(renders.load(Ordering::SeqCst), 2);
    assert_eq!(recorder.calls(), 1);
    assert!(result["message_id"].as_str().is_some_and(|id| !id.is_empty()));
}

#[tokio::test]
async fn queued_priority_reaches_the_transport() {
    let recorder = Recorder::ok("memory");
    let queue = Arc::new(MemoryQueue::new());
    let services =
        MailServices::new(tera()).with_queues(QueueManager::new().channel("mail", queue.clone()));
    let manager = Arc::new(manager_with(single(&recorder), services, &[recorder.clone()]));

    manager
        .queue(&welcome("Jane").to("jane@example.com").priority(1), None)
        .await
        .unwrap();
    let entries = queue.entries().await;
    let registry = JobRegistry::<MailManager>::new().register::<QueuedMailableJob<Welcome>>();
    registry.perform(&entries[0], manager.clone()).await.unwrap().unwrap();

    assert_eq!(recorder.last().priority(), Some(1));

    let customized = welcome("Jane").to("jane@example.com").with_message(|message| {
        message.set_priority(2);
    });
    let err = manager.queue(&customized, None).await.unwrap_err();
    assert!(matches!(err, MailError::NotQueueable(_)));
    assert_eq!(queue.entries().await.len(), 1);
}

#[tokio::test]
async fn fluent_from_wins_over_the_envelope() {
    #[derive(Clone, Default, serde::Serialize, serde::Deserialize)]
    struct Notice;

    impl MailDefinition for Notice {
        const NAME: &'static str = "tests::notice";

        fn envelope(&self) -> Option<Envelope> {
            Some(Envelope::new().from("envelope@example.com"))
        }
    }

    let recorder = Recorder::ok("memory");
    let manager = manager_with(single(&recorder), MailServices::new(tera()), &[recorder.clone()]);

    let fluent = Mailable::new(Notice)
        .from("fluent@example.com")
        .to("jane@example.com")
        .html("<p>hi</p>");
    manager.send(&fluent).await.unwrap();
    assert_eq!(recorder.last().from().map(Address::email), Some("fluent@example.com"));

    let declared = Mailable::new(Notice).to("jane@example.com").html("<p>hi</p>");
    manager.send(&declared).await.unwrap();
    assert_eq!(recorder.last().from().map(Address::email), Some("envelope@example.com"));
}

#[tokio::test]
async fn rendered_bodies_can_be_inspected_without_sending() {
    let recorder = Recorder::ok("memory");
    let manager = manager_with(single(&recorder), MailServices::new(tera()), &[recorder.clone()]);

    let rendered = manager
        .render_bodies(&welcome("Jane").locale("fr"))
        .await
        .unwrap();
    assert_eq!(rendered.html.as_deref(), Some("<p>Hello Jane (fr)</p>"));
    assert_eq!(rendered.text.as_deref(), Some("Hello Jane"));
    assert!(rendered.see_in_html("Jane (fr)"));
    assert!(rendered.see_in_order_in_html(&["Hello", "Jane", "(fr)"]));
    assert!(rendered.see_in_text("Hello Jane"));
    assert!(!rendered.see_in_text("<p>"));
    assert!(!rendered.see_in_order_in_text(&["Jane", "Hello"]));

    let order = Mailable::new(OrderShipped { order_id: 1 })
        .text("welcome.txt", None)
        .with("name", "Buyer");
    let rendered = manager.render_bodies(&order).await.unwrap();
    assert!(rendered.see_in_html("<h1>Order 1</h1>"));
    assert_eq!(rendered.text.as_deref(), Some("Hello Buyer"));

    assert_eq!(recorder.calls(), 0);
}

#[tokio::test]
async fn later_delays_the_job() {
    let recorder = Recorder::ok("memory");
    let queue = Arc::new(MemoryQueue::new());
    let services = MailServices::new(tera()).with_queues(
        QueueManager::new()
            .channel("default", Arc::new(MemoryQueue::new()))
            .channel("slow", queue.clone()),
    );
    let manager = manager_with(single(&recorder), services, &[recorder.clone()]);

    manager
        .later(
            std::time::Duration::from_secs(600),
            &welcome("Jane").to("jane@example.com"),
            Some("slow"),
        )
        .await
        .unwrap();

    let entries = queue.entries().await;
    assert_eq!(entries.len(), 1);
    assert!(entries[0].run_at > entries[0].created_at);
}

#[tokio::test]
async fn queue_without_channels_is_a_configuration_error() {
    let recorder = Recorder::ok("memory");
    let manager = manager_with(single(&recorder), MailServices::new(tera()), &[recorder.clone()]);

    let err = manager.queue(&welcome("Jane"), None).await.unwrap_err();

    assert!(matches!(err, MailError::QueueNotConfigured));
    assert!(err.is_configuration());
}

#[tokio::test]
async fn markdown_renders_html_and_plain_text() {
    let recorder = Recorder::ok("memory");
    let manager = manager_with(single(&recorder), MailServices::new(tera()), &[recorder.clone()]);

    manager
        .send(&Mailable::new(OrderShipped { order_id: 42 }).to("buyer@example.com"))
        .await
        .unwrap();

    let message = recorder.last();
    assert_eq!(message.html(), Some("<h1>Order 42</h1><p>Shipped by UPS</p>"));
    assert_eq!(message.text(), Some("Order 42Shipped by UPS"));
    assert_eq!(message.subject(), Some("Order Shipped"));
    assert_eq!(message.tags(), &["orders".to_string()]);
    assert_eq!(message.metadata()["order_id"], "42");
}

#[tokio::test]
async fn storage_attachments_take_name_and_mime_from_the_disk() {
    let recorder = Recorder::ok("memory");
    let disk =
        MemoryDisk::new().put_with_mime("invoices/7.bin", b"%PDF".to_vec(), "application/pdf");
    let reads = disk.reads();
    let services =
        MailServices::new(tera()).with_storage(Filesystems::default().disk_named("local", disk));
    let manager = manager_with(single(&recorder), services, &[recorder.clone()]);

    let mailable = welcome("Jane")
        .to("jane@example.com")
        .attach_from_storage("invoices/7.bin", None, AttachOptions::new());
    assert_eq!(reads.load(Ordering::SeqCst), 0);

    manager.send(&mailable).await.unwrap();

    let message = recorder.last();
    let attachment = &message.attachments()[0];
    assert_eq!(attachment.filename, "7.bin");
    assert_eq!(attachment.content_type, "application/pdf");
    assert_eq!(attachment.body, b"%PDF".to_vec());
    assert_eq!(reads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unnamed_data_fails_before_the_transport() {
    let recorder = Recorder::ok("memory");
    let manager = manager_with(single(&recorder), MailServices::new(tera()), &[recorder.clone()]);

    let mailable = welcome("Jane")
        .to("jane@example.com")
        .attach(Attachment::from_bytes(b"raw".to_vec()));
    let err = manager.send(&mailable).await.unwrap_err();

    assert!(matches!(err, MailError::MissingFilename));
    assert_eq!(recorder.calls(), 0);
}

#[tokio::test]
async fn missing_disk_surfaces_at_send_time() {
    let recorder = Recorder::ok("memory");
    let manager = manager_with(single(&recorder), MailServices::new(tera()), &[recorder.clone()]);

    let mailable = welcome("Jane")
        .to("jane@example.com")
        .attach_from_storage_disk("s3", "a.pdf", None, AttachOptions::new());
    let err = manager.send(&mailable).await.unwrap_err();

    assert!(matches!(err, MailError::DiskNotConfigured(ref disk) if disk == "s3"));
}

#[tokio::test]
async fn render_inlines_embedded_images() {
    let recorder = Recorder::ok("memory");
    let manager = manager_with(single(&recorder), MailServices::new(tera()), &[recorder.clone()]);

    let mailable = Mailable::new(()).view("photo.html", None).with_message(|message| {
        message.embed_data(vec![1, 2, 3], "logo.png", "image/png");
    });
    let html = manager.render(&mailable).await.unwrap();

    assert_eq!(
        html,
        r#"<img src="data:image/png;base64,AQID"><img src="cid:missing.png">"#
    );
    assert_eq!(recorder.calls(), 0);
}

#[tokio::test]
async fn callbacks_run_after_recipients_and_headers_apply() {
    #[derive(Clone, Default, serde::Serialize, serde::Deserialize)]
    struct Threaded;

    impl MailDefinition for Threaded {
        const NAME: &'static str = "tests::threaded";

        fn headers(&self) -> Option<Headers> {
            Some(
                Headers::new()
                    .message_id("reply-2@example.com")
                    .reference("thread-1@example.com")
                    .text("X-Campaign", "spring"),
            )
        }
    }

    let recorder = Recorder::ok("memory");
    let manager = manager_with(single(&recorder), MailServices::new(tera()), &[recorder.clone()]);

    let mailable = Mailable::new(Threaded)
        .to("jane@example.com")
        .subject("Re: thread")
        .html("<p>hi</p>")
        .priority(1)
        .with_message(|message| {
            let recipients = message.to().len().to_string();
            message.add_text_header("X-Recipients", recipients);
        });
    let sent = manager.send(&mailable).await.unwrap().unwrap();

    let message = recorder.last();
    assert_eq!(message.header("x-recipients"), Some("1"));
    assert_eq!(message.header("Message-ID"), Some("<reply-2@example.com>"));
    assert_eq!(message.header("References"), Some("<thread-1@example.com>"));
    assert_eq!(message.header("X-Campaign"), Some("spring"));
    assert_eq!(message.priority(), Some(1));
    assert_eq!(sent.message_id(), "reply-2@example.com");
}

#[tokio::test]
async fn pending_mail_readdresses_the_mailable() {
    let recorder = Recorder::ok("memory");
    let manager = manager_with(single(&recorder), MailServices::new(tera()), &[recorder.clone()]);

    let mailable = welcome("Jane").to("someone-else@example.com");
    manager
        .to(("jane@example.com", "Jane"))
        .bcc("audit@example.com")
        .locale("de")
        .send(&mailable)
        .await
        .unwrap();

    let message = recorder.last();
    assert_eq!(message.to(), &[Address::new("jane@example.com")]);
    assert_eq!(message.bcc(), &[Address::new("audit@example.com")]);
    assert_eq!(message.html(), Some("<p>Hello Jane (de)</p>"));
}

#[tokio::test]
async fn unknown_mailer_is_reported_by_name() {
    let recorder = Recorder::ok("memory");
    let manager = manager_with(single(&recorder), MailServices::new(tera()), &[recorder.clone()]);

    let mailable = welcome("Jane").to("jane@example.com").mailer("marketing");
    let err = manager.send(&mailable).await.unwrap_err();

    assert!(matches!(err, MailError::MailerNotDefined(ref name) if name == "marketing"));
    assert!(err.is_configuration());
}

#[test]
fn mailables_survive_serialization_with_deferred_attachments() {
    let mailable = welcome("Jane")
        .to("jane@example.com")
        .attach_path("/srv/reports/q1.pdf", AttachOptions::new())
        .attach_from_storage_disk(
            "s3",
            "invoices/7.pdf",
            Some("invoice.pdf"),
            AttachOptions::new(),
        );

    let json = serde_json::to_value(&mailable).unwrap();
    let restored: Mailable<Welcome> = serde_json::from_value(json).unwrap();

    assert_eq!(restored.definition().name, "Jane");
    assert!(restored.has_to("jane@example.com", None));
    assert_eq!(restored.state().attachments.len(), 2);

    let lazy = Mailable::new(()).attach(Attachment::from_data(|| Ok(vec![1])).with_name("a.bin"));
    assert!(serde_json::to_value(&lazy).is_err());
}
