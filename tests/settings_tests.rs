//! Settings editing through the controller and the editor

use std::sync::Arc;
use talkback::controller::{ClientEvent, InteractionController, SharedState, View};
use talkback::settings::{Config, ConfigPatch, SettingsEditor};
use talkback::testing::{FakeBackend, FakeMicrophone};
use talkback::{ClientConfig, ClientError};

fn controller_with(
    backend: &FakeBackend,
) -> (
    InteractionController<FakeBackend, FakeMicrophone>,
    talkback::ClientHandle,
) {
    InteractionController::new(
        ClientConfig::default(),
        backend.clone(),
        FakeMicrophone::new(16000),
    )
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_save_then_load_yields_saved_value() {
    let backend = FakeBackend::new();
    let state = SharedState::new();
    let editor = SettingsEditor::new(Arc::new(backend.clone()), state.clone());
    editor.load_models().await.unwrap();
    editor.load().await.unwrap();

    editor.edit(&ConfigPatch::model("llama3.1:latest")).unwrap();
    editor.edit(&ConfigPatch::temperature(0.4)).unwrap();
    editor.save().await.unwrap();
    let saved = backend.saved_configs().pop().unwrap();

    editor.load().await.unwrap();
    let state = state.read();
    assert_eq!(state.settings.draft(), Some(&saved));
    assert_eq!(state.settings.committed(), Some(&saved));
    assert_eq!(saved.model, "llama3.1:latest");
    assert_eq!(saved.options.temperature, 0.4);
}

#[tokio::test(start_paused = true)]
async fn test_reset_discards_unsaved_edits() {
    let backend = FakeBackend::new();
    let mut custom = Config::new("llama3.1:latest");
    custom.context = "Talk like a pirate.".into();
    backend.set_config(custom);

    let (mut controller, _handle) = controller_with(&backend);
    controller.initialize().await;
    controller.edit_settings(&ConfigPatch::temperature(0.1)).unwrap();

    assert!(controller.reset_settings(true).await.unwrap());

    let defaults = Config::new("gemma2:9b");
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.settings.draft(), Some(&defaults));
    assert_eq!(snapshot.settings.committed(), Some(&defaults));
    assert_eq!(
        snapshot.interaction.notice.as_deref(),
        Some("Settings reset to defaults")
    );
}

#[tokio::test(start_paused = true)]
async fn test_unconfirmed_reset_changes_nothing() {
    let backend = FakeBackend::new();
    let (mut controller, _handle) = controller_with(&backend);
    controller.initialize().await;
    controller.edit_settings(&ConfigPatch::temperature(0.1)).unwrap();

    assert!(!controller.reset_settings(false).await.unwrap());
    assert_eq!(backend.calls("reset_config"), 0);
    assert!(controller.snapshot().settings.is_dirty());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_model_lands_in_error_slot() {
    let backend = FakeBackend::new();
    let (mut controller, mut handle) = controller_with(&backend);
    controller.initialize().await;

    let err = controller
        .edit_settings(&ConfigPatch::model("mystery:70b"))
        .unwrap_err();
    assert_eq!(err, ClientError::UnknownModel("mystery:70b".into()));
    assert_eq!(
        controller.state().error_message().as_deref(),
        Some("Model 'mystery:70b' is not available")
    );

    let mut errors = 0;
    while let Some(event) = handle.try_recv_event() {
        if matches!(event, ClientEvent::Error(_)) {
            errors += 1;
        }
    }
    assert_eq!(errors, 1);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_save_keeps_edits() {
    let backend = FakeBackend::new();
    backend.reject_saves("Model not installed");
    let (mut controller, _handle) = controller_with(&backend);
    controller.initialize().await;
    controller.switch_view(View::Settings);
    controller
        .edit_settings(&ConfigPatch::context("Be concise."))
        .unwrap();

    let err = controller.save_settings().await.unwrap_err();
    assert_eq!(err, ClientError::BackendRejected("Model not installed".into()));

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.settings.draft().unwrap().context, "Be concise.");
    assert_eq!(snapshot.settings.committed().unwrap().context, "");
    assert_eq!(
        snapshot.interaction.error_message.as_deref(),
        Some("Model not installed")
    );
    assert!(snapshot.interaction.notice.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_saved_edits_survive_leaving_settings() {
    let backend = FakeBackend::new();
    let (mut controller, _handle) = controller_with(&backend);
    controller.initialize().await;
    controller.switch_view(View::Settings);
    controller
        .edit_settings(&ConfigPatch::context("Be concise."))
        .unwrap();
    controller.save_settings().await.unwrap();

    controller.switch_view(View::Chat);
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.settings.draft().unwrap().context, "Be concise.");
    assert_eq!(backend.stored_config().context, "Be concise.");
}

#[tokio::test(start_paused = true)]
async fn test_settings_before_load_are_invalid() {
    let backend = FakeBackend::new();
    backend.go_offline();
    let (mut controller, _handle) = controller_with(&backend);
    controller.initialize().await;
    backend.go_online();

    assert!(matches!(
        controller.edit_settings(&ConfigPatch::temperature(0.5)),
        Err(ClientError::InvalidState(_))
    ));
    assert!(matches!(
        controller.save_settings().await,
        Err(ClientError::InvalidState(_))
    ));
    assert_eq!(backend.calls("save_config"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_backend_fields_are_saved_back() {
    let backend = FakeBackend::new();
    let config: Config = serde_json::from_str(
        r#"{"model": "gemma2:9b", "options": {"temperature": 0.7, "top_p": 0.9,
            "top_k": 40, "repeat_penalty": 1.1, "num_predict": 1000, "seed": 7},
            "context": "", "voice": "alloy"}"#,
    )
    .unwrap();
    backend.set_config(config);

    let (mut controller, _handle) = controller_with(&backend);
    controller.initialize().await;
    controller.edit_settings(&ConfigPatch::temperature(0.5)).unwrap();
    controller.save_settings().await.unwrap();

    let saved = serde_json::to_value(backend.stored_config()).unwrap();
    assert_eq!(saved["voice"], "alloy");
    assert_eq!(saved["options"]["seed"], 7);
    assert_eq!(saved["options"]["temperature"], 0.5);
}
