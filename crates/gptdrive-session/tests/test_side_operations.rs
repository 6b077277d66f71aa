//! Integration tests for menu-driven and network-log backed operations.

mod common;

use std::time::Duration;

use gptdrive_browser::{BrowserHandle, Key};
use gptdrive_core::{Catalogue, Error, Theme};
use serde_json::json;

use common::*;

async fn element_id(fake: &FakeBrowser, locator: &gptdrive_core::Locator) -> String {
    fake.find(locator).await.unwrap().unwrap().id
}

fn escape_presses(fake: &FakeBrowser) -> usize {
    fake.keys().iter().filter(|(_, k)| *k == Key::Escape).count()
}

// ---------------------------------------------------------------
// Conversations
// ---------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_reset_twice() {
    let catalogue = Catalogue::default();
    let fake = chat_site(&catalogue);
    let mut config = test_config();
    config.conversation_id = Some("abc".into());
    let mut session = start(&fake, config).await.unwrap();
    let new_chat = element_id(&fake, &catalogue.selectors.new_chat).await;

    session.reset_conversation().await.unwrap();
    assert_eq!(session.conversation_id(), None);
    session.reset_conversation().await.unwrap();
    assert_eq!(session.conversation_id(), None);

    assert_eq!(fake.clicks().iter().filter(|c| **c == new_chat).count(), 2);
    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_reset_off_site_is_skipped() {
    let catalogue = Catalogue::default();
    let fake = chat_site(&catalogue);
    let mut session = start(&fake, test_config()).await.unwrap();
    let new_chat = element_id(&fake, &catalogue.selectors.new_chat).await;
    fake.navigate("about:blank").await.unwrap();

    session.reset_conversation().await.unwrap();

    assert!(!fake.clicked(&new_chat));
    assert_eq!(session.conversation_id(), None);
    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_reset_without_button_unwinds() {
    let catalogue = Catalogue::default();
    let fake = chat_site(&catalogue);
    fake.clear(&catalogue.selectors.new_chat);
    let mut session = start(&fake, test_config()).await.unwrap();

    session.reset_conversation().await.unwrap();

    assert_eq!(escape_presses(&fake), 5);
    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_switch_conversation() {
    let catalogue = Catalogue::default();
    let fake = chat_site(&catalogue);
    let mut session = start(&fake, test_config()).await.unwrap();

    session.switch_conversation("c-42").await.unwrap();

    assert_eq!(session.conversation_id(), Some("c-42"));
    assert_eq!(
        fake.navigations().last().unwrap(),
        &catalogue.urls.conversation("c-42")
    );
    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_switch_to_invalid_conversation() {
    let catalogue = Catalogue::default();
    let fake = chat_site(&catalogue);
    fake.on_navigate(
        "/chat/does-not-exist",
        &catalogue.selectors.alert,
        FakeElement::new("Unable to load conversation does-not-exist"),
    );
    let mut config = test_config();
    config.conversation_id = Some("abc".into());
    let mut session = start(&fake, config).await.unwrap();

    let result = session.switch_conversation("does-not-exist").await;

    assert!(matches!(result, Err(Error::InvalidConversationId(_))));
    assert_eq!(session.conversation_id(), None);
    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_clear_conversations() {
    let catalogue = Catalogue::default();
    let fake = chat_site(&catalogue);
    let selectors = &catalogue.selectors;
    let menu = fake.place(&selectors.menu_button, FakeElement::new("Menu"));
    let clear = fake.place(&selectors.menu_clear_conversations, FakeElement::new("Clear"));
    let confirm = fake.place(
        &selectors.menu_confirm_clear_conversations,
        FakeElement::new("Confirm deletion"),
    );
    let mut config = test_config();
    config.conversation_id = Some("abc".into());
    let mut session = start(&fake, config).await.unwrap();

    session.clear_conversations().await.unwrap();

    let clicks = fake.clicks();
    let order: Vec<usize> = [&menu, &clear, &confirm]
        .iter()
        .map(|id| clicks.iter().position(|c| c == *id).unwrap())
        .collect();
    assert!(order[0] < order[1] && order[1] < order[2]);
    assert_eq!(session.conversation_id(), None);
    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_clear_conversations_without_menu() {
    let catalogue = Catalogue::default();
    let fake = chat_site(&catalogue);
    let mut config = test_config();
    config.conversation_id = Some("abc".into());
    let mut session = start(&fake, config).await.unwrap();

    session.clear_conversations().await.unwrap();

    assert_eq!(session.conversation_id(), Some("abc"));
    assert_eq!(escape_presses(&fake), 5);
    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_conversation_listing() {
    let catalogue = Catalogue::default();
    let fake = chat_site(&catalogue);
    let mut session = start(&fake, test_config()).await.unwrap();

    let listing = session.get_conversations().await.unwrap().unwrap();

    assert_eq!(listing.items.len(), 1);
    assert_eq!(listing.items[0].id, CONVERSATION_ID);
    assert_eq!(listing.items[0].title, "Greeting");
    assert_eq!(listing.limit, 28);
    assert!(!listing.has_missing);
    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_shared_conversations_timeout() {
    let catalogue = Catalogue::default();
    let fake = chat_site(&catalogue);
    let mut session = start(&fake, test_config()).await.unwrap();

    let shared = session
        .get_shared_conversations(Duration::from_secs(3))
        .await
        .unwrap();

    assert!(shared.is_none());
    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_shared_conversations_listing() {
    let catalogue = Catalogue::default();
    let fake = chat_site(&catalogue);
    fake.add_json_response(
        "3000.2",
        "https://chat.openai.com/backend-api/shared_conversations?order=created",
        json!({
            "items": [{
                "id": "share-1",
                "title": "Shared chat",
                "conversation_id": CONVERSATION_ID,
                "create_time": "2023-06-01T10:00:00+00:00"
            }],
            "total": 1,
            "limit": 100,
            "offset": 0
        }),
    );
    let mut session = start(&fake, test_config()).await.unwrap();

    let shared = session
        .get_shared_conversations(Duration::from_secs(3))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(shared.items[0].id, "share-1");
    assert_eq!(shared.items[0].conversation_id, CONVERSATION_ID);
    session.close().await;
}

// ---------------------------------------------------------------
// Account
// ---------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_get_session_data() {
    let catalogue = Catalogue::default();
    let fake = chat_site(&catalogue);
    let mut session = start(&fake, test_config()).await.unwrap();

    let data = session.get_session_data().await.unwrap();

    assert_eq!(data.user.name, "Test User");
    assert_eq!(data.access_token, "access-1");
    assert_eq!(data.auth_provider, "auth0");
    assert_eq!(fake.open_tabs(), 1);
    assert_eq!(fake.current_tab_id().unwrap().0, "tab-0");
    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_switch_account() {
    let catalogue = Catalogue::default();
    let fake = chat_site(&catalogue);
    let mut config = test_config();
    config.conversation_id = Some("abc".into());
    let mut session = start(&fake, config).await.unwrap();
    fake.set_page(
        &catalogue.urls.auth_session,
        &session_payload("Second User").to_string(),
    );

    let data = session.switch_account("token-2").await.unwrap();

    assert_eq!(data.user.name, "Second User");
    assert_eq!(fake.cookies().last().unwrap().value, "token-2");
    assert_eq!(session.config().session_token, "token-2");
    assert_eq!(session.conversation_id(), None);
    assert_eq!(fake.navigations().last().unwrap(), &catalogue.urls.chat);
    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_switch_account_rejected() {
    let catalogue = Catalogue::default();
    let fake = chat_site(&catalogue);
    let mut session = start(&fake, test_config()).await.unwrap();
    fake.set_page(&catalogue.urls.auth_session, "{}");

    let result = session.switch_account("expired").await;

    assert!(matches!(result, Err(Error::InvalidCredential(_))));
    assert!(session.is_active());
    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_logout() {
    let catalogue = Catalogue::default();
    let fake = chat_site(&catalogue);
    let mut session = start(&fake, test_config()).await.unwrap();
    fake.set_page(&catalogue.urls.auth_session, "{}");

    session.logout().await.unwrap();

    assert_eq!(
        fake.deleted_cookies(),
        vec![(
            catalogue.urls.session_cookie_name.clone(),
            catalogue.urls.base.clone()
        )]
    );
    assert_eq!(fake.open_tabs(), 1);
    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_user_data() {
    let catalogue = Catalogue::default();
    let fake = chat_site(&catalogue);
    let mut session = start(&fake, test_config()).await.unwrap();
    assert!(session.get_user_data().await.unwrap().is_none());

    fake.add_json_response(
        "4000.3",
        "https://chat.openai.com/backend-api/accounts/check/v4-2023-04-27",
        json!({
            "accounts": {
                "default": {
                    "account": {"account_id": "acc-1", "account_user_role": "account-owner"},
                    "features": ["beta"],
                    "entitlement": {"has_active_subscription": true, "subscription_plan": "chatgptplusplan"},
                    "last_active_subscription": {"will_renew": true}
                }
            }
        }),
    );
    let accounts = session.get_user_data().await.unwrap().unwrap();

    assert_eq!(accounts.default.account.account_id, "acc-1");
    assert_eq!(accounts.default.features, vec!["beta".to_string()]);
    assert!(accounts.default.entitlement.has_active_subscription);
    assert!(accounts.default.last_active_subscription.will_renew);
    session.close().await;
}

// ---------------------------------------------------------------
// Settings
// ---------------------------------------------------------------

fn place_settings_menu(fake: &FakeBrowser, catalogue: &Catalogue) {
    let selectors = &catalogue.selectors;
    fake.place(&selectors.menu_button, FakeElement::new("Menu"));
    fake.place(&selectors.menu_settings, FakeElement::new("Settings"));
}

#[tokio::test(start_paused = true)]
async fn test_disable_chat_history() {
    let catalogue = Catalogue::default();
    let fake = chat_site(&catalogue);
    place_settings_menu(&fake, &catalogue);
    fake.place(&catalogue.selectors.data_controls, FakeElement::new("Data controls"));
    let toggle = fake.place(
        &catalogue.selectors.chat_history_toggle,
        FakeElement::new("").with_attr("aria-checked", "true"),
    );
    let clear_chat = fake.place(&catalogue.selectors.clear_chat, FakeElement::new("Clear chat"));
    let mut session = start(&fake, test_config()).await.unwrap();

    session.toggle_chat_history(false).await.unwrap();

    assert!(fake.clicked(&toggle));
    assert!(!session.history_enabled());
    assert_eq!(escape_presses(&fake), 5);

    // With history off, a reset clears the chat instead of opening a new one.
    session.reset_conversation().await.unwrap();
    assert!(fake.clicked(&clear_chat));
    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_chat_history_already_in_state() {
    let catalogue = Catalogue::default();
    let fake = chat_site(&catalogue);
    place_settings_menu(&fake, &catalogue);
    fake.place(&catalogue.selectors.data_controls, FakeElement::new("Data controls"));
    let toggle = fake.place(
        &catalogue.selectors.chat_history_toggle,
        FakeElement::new("").with_attr("aria-checked", "false"),
    );
    let mut session = start(&fake, test_config()).await.unwrap();

    session.toggle_chat_history(false).await.unwrap();

    assert!(!fake.clicked(&toggle));
    assert!(!session.history_enabled());
    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_chat_history_unknown_state_is_left_alone() {
    let catalogue = Catalogue::default();
    let fake = chat_site(&catalogue);
    place_settings_menu(&fake, &catalogue);
    fake.place(&catalogue.selectors.data_controls, FakeElement::new("Data controls"));
    let toggle = fake.place(&catalogue.selectors.chat_history_toggle, FakeElement::new(""));
    let new_chat = element_id(&fake, &catalogue.selectors.new_chat).await;
    let mut session = start(&fake, test_config()).await.unwrap();

    session.toggle_chat_history(false).await.unwrap();

    assert!(!fake.clicked(&toggle));
    assert!(session.history_enabled());
    assert_eq!(escape_presses(&fake), 5);

    session.reset_conversation().await.unwrap();
    assert!(fake.clicked(&new_chat));
    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_chat_history_menu_missing() {
    let catalogue = Catalogue::default();
    let fake = chat_site(&catalogue);
    let mut session = start(&fake, test_config()).await.unwrap();

    session.toggle_chat_history(false).await.unwrap();

    assert!(session.history_enabled());
    assert_eq!(escape_presses(&fake), 5);
    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_opposite_of_system_theme_is_noop() {
    let catalogue = Catalogue::default();
    let fake = chat_site(&catalogue);
    place_settings_menu(&fake, &catalogue);
    let combobox = fake.place(&catalogue.selectors.theme_button, FakeElement::new("System"));
    let mut session = start(&fake, test_config()).await.unwrap();

    session.switch_theme(Theme::Opposite).await.unwrap();

    assert!(!fake.clicked(&combobox));
    assert_eq!(session.current_theme().await.unwrap(), Theme::System);
    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_opposite_of_dark_selects_light() {
    let catalogue = Catalogue::default();
    let fake = chat_site(&catalogue);
    place_settings_menu(&fake, &catalogue);
    let combobox = fake.place(&catalogue.selectors.theme_button, FakeElement::new("Dark"));
    let dark = fake.place(&catalogue.selectors.theme_options, FakeElement::new("Dark"));
    let light = fake.place(&catalogue.selectors.theme_options, FakeElement::new("Light"));
    let mut session = start(&fake, test_config()).await.unwrap();

    session.switch_theme(Theme::Opposite).await.unwrap();

    assert!(fake.hovers().contains(&combobox));
    assert!(fake.clicked(&combobox));
    assert!(fake.clicked(&light));
    assert!(!fake.clicked(&dark));
    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_same_theme_is_noop() {
    let catalogue = Catalogue::default();
    let fake = chat_site(&catalogue);
    place_settings_menu(&fake, &catalogue);
    let combobox = fake.place(&catalogue.selectors.theme_button, FakeElement::new("Light"));
    let mut session = start(&fake, test_config()).await.unwrap();

    session.switch_theme(Theme::Light).await.unwrap();

    assert!(!fake.clicked(&combobox));
    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_theme_from_root_class() {
    let catalogue = Catalogue::default();
    let fake = chat_site(&catalogue);
    fake.place(
        &catalogue.selectors.html,
        FakeElement::new("").with_attr("class", "dark"),
    );
    let mut session = start(&fake, test_config()).await.unwrap();

    assert_eq!(session.current_theme().await.unwrap(), Theme::Dark);
    // Settings menu is unavailable, so switching does nothing and does not fail.
    session.switch_theme(Theme::Light).await.unwrap();
    session.close().await;
}
