use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::{ServiceCategory, format_service_titles, service_list_prompt};
use crate::inbound::InboundEvent;
use crate::messaging::ReplyButton;
use crate::models::{NewProviderProfile, NewUser, Role, User};
use crate::redact::phone_label;
use crate::relay::{ChatRole, CompletionOutcome, RelayOutcome};
use crate::session::{SessionRecord, decode_state};

use super::offers::{OfferResolution, format_window};
use super::{
    CHATTABLE_STATUSES, FlowError, Marketplace, format_date, name_problem, request_heading,
};

pub const BTN_ACCEPT_REQUEST: &str = "btn_accept_request";
pub const BTN_DECLINE_REQUEST: &str = "btn_decline_request";
pub const BTN_CHAT_CUSTOMER: &str = "btn_chat_customer";
pub const BTN_ADD_MORE: &str = "btn_add_more";
pub const BTN_CONTINUE: &str = "btn_continue";
pub const BTN_GO_ONLINE: &str = "btn_go_online";
pub const BTN_GO_OFFLINE: &str = "btn_go_offline";
pub const BTN_SETTINGS: &str = "btn_settings";

pub(crate) const MIN_BIO_CHARS: usize = 10;
pub(crate) const MAX_BIO_CHARS: usize = 200;
const REQUEST_LIST_LIMIT: i64 = 10;
const REGISTER_COMMANDS: [&str; 2] = ["register provider", "registrar proveedor"];

/// A registered provider as carried in session data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderIdentity {
    pub user_id: Uuid,
    pub provider_id: Uuid,
    pub name: String,
}

/// The offer a provider is being asked to answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOffer {
    pub request_id: Uuid,
    pub assignment_id: Uuid,
    pub customer_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderState {
    New,
    RegistrationStart {
        whatsapp_name: String,
    },
    AwaitingProviderName {
        whatsapp_name: String,
    },
    AwaitingServiceTypes {
        name: String,
        #[serde(default)]
        services: Vec<ServiceCategory>,
    },
    AwaitingBio {
        name: String,
        services: Vec<ServiceCategory>,
    },
    Registered {
        identity: ProviderIdentity,
    },
    Idle {
        identity: ProviderIdentity,
    },
    RequestReceived {
        identity: ProviderIdentity,
        offer: PendingOffer,
    },
    AwaitingRequestResponse {
        identity: ProviderIdentity,
        offer: PendingOffer,
    },
    ChatActive {
        identity: ProviderIdentity,
        request_id: Uuid,
        customer_name: String,
    },
}

impl ProviderState {
    /// Tags that only the provider machine ever writes.
    pub const EXCLUSIVE_TAGS: [&'static str; 7] = [
        "REGISTRATION_START",
        "AWAITING_PROVIDER_NAME",
        "AWAITING_SERVICE_TYPES",
        "AWAITING_BIO",
        "IDLE",
        "REQUEST_RECEIVED",
        "AWAITING_REQUEST_RESPONSE",
    ];

    pub fn is_exclusive_tag(tag: &str) -> bool {
        Self::EXCLUSIVE_TAGS.contains(&tag)
    }

    fn identity(&self) -> Option<&ProviderIdentity> {
        match self {
            Self::Registered { identity }
            | Self::Idle { identity }
            | Self::RequestReceived { identity, .. }
            | Self::AwaitingRequestResponse { identity, .. }
            | Self::ChatActive { identity, .. } => Some(identity),
            _ => None,
        }
    }
}

pub fn is_register_command(event: &InboundEvent) -> bool {
    event
        .keyword()
        .is_some_and(|text| REGISTER_COMMANDS.contains(&text.as_str()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdleCommand {
    Availability(bool),
    Requests,
    Stats,
    Settings,
}

fn idle_command(event: &InboundEvent) -> Option<IdleCommand> {
    if event.is_command(&["go online", "online"], BTN_GO_ONLINE) {
        return Some(IdleCommand::Availability(true));
    }
    if event.is_command(&["go offline", "offline"], BTN_GO_OFFLINE) {
        return Some(IdleCommand::Availability(false));
    }
    if event.is_command(&["settings"], BTN_SETTINGS) {
        return Some(IdleCommand::Settings);
    }
    match event.keyword().as_deref() {
        Some("my requests" | "requests") => Some(IdleCommand::Requests),
        Some("my stats" | "stats") => Some(IdleCommand::Stats),
        _ => None,
    }
}

fn help_text(offer_window: Duration) -> String {
    format!(
        "❓ *Provider Help*\n\nAvailable commands:\n\n\
         📝 *\"register provider\"* — Start provider registration\n\
         🟢 *\"go online\"* — Make yourself available\n\
         🔴 *\"go offline\"* — Go offline\n\
         📋 *\"my requests\"* — View your requests\n\
         📊 *\"my stats\"* — View your statistics\n\
         ⚙️ *\"settings\"* — Update your profile\n\
         ❌ *\"cancel\"* — Stop what you're doing\n\
         ❓ *\"help\"* — Show this help message\n\n\
         When you receive a request, tap Accept or Decline within {}.",
        format_window(offer_window)
    )
}

/// Conversation machine for provider phones.
#[derive(Clone)]
pub struct ProviderFlow {
    market: Marketplace,
}

impl ProviderFlow {
    pub fn new(market: Marketplace) -> Self {
        Self { market }
    }

    pub async fn handle(
        &self,
        event: &InboundEvent,
        session: Option<SessionRecord>,
        user: Option<User>,
    ) -> Result<(), FlowError> {
        let phone = event.sender_phone.as_str();
        // Checked before decoding so a refused customer keeps their session.
        if is_register_command(event) {
            return self.start_registration(event, user.as_ref()).await;
        }

        let state = match session {
            None => ProviderState::New,
            Some(record) => match decode_state::<ProviderState>(&record) {
                Some(state) => state,
                None => {
                    warn!(
                        phone = %phone_label(phone),
                        state = %record.state,
                        "resetting provider session with unknown state"
                    );
                    self.market.sessions.delete(phone).await?;
                    ProviderState::New
                }
            },
        };

        match event.keyword().as_deref() {
            Some("help") => return self.send_help(phone).await,
            Some("menu" | "start") => {
                return self.show_menu(phone, &state, user.as_ref()).await;
            }
            Some("cancel") => return self.cancel(phone, &state).await,
            _ => {}
        }

        match state {
            ProviderState::New => match self.registered_identity(user.as_ref()).await? {
                Some(identity) => self.handle_idle(event, identity).await,
                None => {
                    self.market
                        .outbox
                        .send_text(
                            phone,
                            "👋 Hello! To register as a service provider, type:\n\n*\"register provider\"*\n\nOr send \"help\" for more information.",
                        )
                        .await;
                    Ok(())
                }
            },
            ProviderState::RegistrationStart { whatsapp_name } => {
                self.ask_name(phone, whatsapp_name).await
            }
            ProviderState::AwaitingProviderName { .. } => self.handle_name(event).await,
            ProviderState::AwaitingServiceTypes { name, services } => {
                self.handle_service_types(event, name, services).await
            }
            ProviderState::AwaitingBio { name, services } => {
                self.handle_bio(event, user, name, services).await
            }
            ProviderState::Registered { identity } | ProviderState::Idle { identity } => {
                self.handle_idle(event, identity).await
            }
            ProviderState::RequestReceived { identity, offer }
            | ProviderState::AwaitingRequestResponse { identity, offer } => {
                self.handle_offer_response(event, identity, offer).await
            }
            ProviderState::ChatActive {
                identity,
                request_id,
                customer_name,
            } => {
                self.handle_chat(event, identity, request_id, &customer_name)
                    .await
            }
        }
    }

    async fn send_help(&self, phone: &str) -> Result<(), FlowError> {
        self.market
            .outbox
            .send_text(phone, help_text(self.market.offers.window()))
            .await;
        Ok(())
    }

    /// Drops whatever the provider was doing. A pending offer stays with its
    /// expiry timer.
    async fn cancel(&self, phone: &str, state: &ProviderState) -> Result<(), FlowError> {
        if let ProviderState::ChatActive { request_id, .. } = state {
            self.market.relay.end(*request_id, phone).await?;
        }
        self.market.sessions.delete(phone).await?;
        self.market
            .outbox
            .send_text(
                phone,
                "✅ Your current action has been cancelled.\n\nType \"menu\" to return to your dashboard or \"register provider\" to start over.",
            )
            .await;
        Ok(())
    }

    async fn show_menu(
        &self,
        phone: &str,
        state: &ProviderState,
        user: Option<&User>,
    ) -> Result<(), FlowError> {
        if let ProviderState::ChatActive { request_id, .. } = state {
            self.market.relay.end(*request_id, phone).await?;
        }

        let identity = match state.identity() {
            Some(identity) => Some(identity.clone()),
            None => self.registered_identity(user).await?,
        };
        let Some(identity) = identity else {
            self.market
                .outbox
                .send_text(
                    phone,
                    "👋 Hello! To register as a provider, type:\n\n*\"register provider\"*",
                )
                .await;
            return Ok(());
        };

        self.market
            .outbox
            .send_text(
                phone,
                format!(
                    "👋 Welcome back, {}!\n\nUse these commands:\n\n\
                     🟢 \"go online\" — Make yourself available\n\
                     🔴 \"go offline\" — Go offline\n\
                     📋 \"my requests\" — View your requests\n\
                     📊 \"my stats\" — View your statistics\n\
                     ⚙️ \"settings\" — Update your profile",
                    identity.name
                ),
            )
            .await;
        self.market
            .sessions
            .put_state(phone, &ProviderState::Idle { identity })
            .await?;
        Ok(())
    }

    async fn start_registration(
        &self,
        event: &InboundEvent,
        user: Option<&User>,
    ) -> Result<(), FlowError> {
        let phone = event.sender_phone.as_str();
        match user.map(|user| user.role) {
            Some(Role::Provider) => {
                self.market
                    .outbox
                    .send_text(
                        phone,
                        "✅ You're already registered as a provider!\n\nType \"menu\" to see your options.",
                    )
                    .await;
                return Ok(());
            }
            Some(Role::Customer) => {
                self.market
                    .outbox
                    .send_text(
                        phone,
                        "❌ This number is already registered as a customer.\n\nProvider accounts need their own WhatsApp number.",
                    )
                    .await;
                return Ok(());
            }
            None => {}
        }

        self.market
            .outbox
            .send_text(
                phone,
                "👋 Welcome to *Handy Provider Registration*!\n\nLet's get you set up. First, what's your name?",
            )
            .await;
        self.market
            .sessions
            .put_state(
                phone,
                &ProviderState::AwaitingProviderName {
                    whatsapp_name: event.sender_name.clone(),
                },
            )
            .await?;
        Ok(())
    }

    async fn ask_name(&self, phone: &str, whatsapp_name: String) -> Result<(), FlowError> {
        self.market
            .outbox
            .send_text(phone, "📝 What's your name?")
            .await;
        self.market
            .sessions
            .put_state(phone, &ProviderState::AwaitingProviderName { whatsapp_name })
            .await?;
        Ok(())
    }

    async fn handle_name(&self, event: &InboundEvent) -> Result<(), FlowError> {
        let phone = event.sender_phone.as_str();
        let outbox = &self.market.outbox;
        let Some(name) = event.text_body() else {
            outbox
                .send_text(phone, "📝 Please type your name to continue.")
                .await;
            return Ok(());
        };
        if let Some(problem) = name_problem(name) {
            outbox.send_text(phone, problem).await;
            return Ok(());
        }

        outbox
            .send_text(
                phone,
                format!("✅ Great, {name}!\n\nWhat services do you offer? Select all that apply:"),
            )
            .await;
        outbox
            .send_list(
                phone,
                service_list_prompt(
                    "Select Services",
                    "Choose the services you provide. You can select multiple.",
                    "Select Services",
                ),
            )
            .await;
        self.market
            .sessions
            .put_state(
                phone,
                &ProviderState::AwaitingServiceTypes {
                    name: name.to_string(),
                    services: Vec::new(),
                },
            )
            .await?;
        Ok(())
    }

    async fn handle_service_types(
        &self,
        event: &InboundEvent,
        name: String,
        mut services: Vec<ServiceCategory>,
    ) -> Result<(), FlowError> {
        let phone = event.sender_phone.as_str();
        let outbox = &self.market.outbox;

        match event.button_id() {
            Some(BTN_ADD_MORE) => {
                outbox
                    .send_list(
                        phone,
                        service_list_prompt(
                            "Select Services",
                            "Choose additional services you provide.",
                            "Select Services",
                        ),
                    )
                    .await;
                return Ok(());
            }
            Some(BTN_CONTINUE) => {
                if services.is_empty() {
                    outbox
                        .send_text(phone, "Please select at least one service.")
                        .await;
                    return Ok(());
                }
                outbox
                    .send_text(
                        phone,
                        "📝 Write a short bio about your experience (max 200 characters):",
                    )
                    .await;
                self.market
                    .sessions
                    .put_state(phone, &ProviderState::AwaitingBio { name, services })
                    .await?;
                return Ok(());
            }
            _ => {}
        }

        let Some(selected) = event.list_id().and_then(ServiceCategory::from_row_id) else {
            outbox
                .send_text(phone, "🤔 Please select a service from the list above.")
                .await;
            return Ok(());
        };
        if !services.contains(&selected) {
            services.push(selected);
        }

        outbox
            .send_text(
                phone,
                format!(
                    "✅ Selected: {}\n\nWould you like to add another service?",
                    format_service_titles(&services)
                ),
            )
            .await;
        outbox
            .send_buttons(
                phone,
                "Choose an option:",
                &[
                    ReplyButton::new(BTN_ADD_MORE, "➕ Add More"),
                    ReplyButton::new(BTN_CONTINUE, "✅ Continue"),
                ],
            )
            .await;
        self.market
            .sessions
            .put_state(phone, &ProviderState::AwaitingServiceTypes { name, services })
            .await?;
        Ok(())
    }

    async fn handle_bio(
        &self,
        event: &InboundEvent,
        user: Option<User>,
        name: String,
        services: Vec<ServiceCategory>,
    ) -> Result<(), FlowError> {
        let phone = event.sender_phone.as_str();
        let outbox = &self.market.outbox;
        let Some(bio) = event.text_body() else {
            outbox.send_text(phone, "📝 Please type your bio.").await;
            return Ok(());
        };
        let bio_chars = bio.chars().count();
        if bio_chars < MIN_BIO_CHARS {
            outbox
                .send_text(phone, "📝 Please enter a bio with at least 10 characters.")
                .await;
            return Ok(());
        }
        if bio_chars > MAX_BIO_CHARS {
            outbox
                .send_text(
                    phone,
                    "📝 Bio is too long (max 200 characters). Please shorten it.",
                )
                .await;
            return Ok(());
        }

        let store = &self.market.store;
        let user = match user {
            Some(user) => user,
            None => {
                store
                    .create_user(NewUser {
                        name: name.clone(),
                        phone: phone.to_string(),
                        role: Role::Provider,
                        whatsapp_name: Some(event.sender_name.clone()),
                    })
                    .await?
            }
        };
        let profile = match store.find_provider_by_user(user.id).await? {
            Some(profile) => profile,
            None => {
                store
                    .create_provider_profile(NewProviderProfile {
                        user_id: user.id,
                        service_types: services.clone(),
                        bio: bio.to_string(),
                    })
                    .await?
            }
        };
        info!(
            provider_id = %profile.id,
            phone = %phone_label(phone),
            "provider registered"
        );

        outbox
            .send_text(
                phone,
                format!(
                    "✅ *Provider Profile Created!*\n\n👤 Name: {name}\n🛠 Services: {}\n📝 Bio: {bio}\n\nYou're now visible to customers! Toggle your availability below.",
                    format_service_titles(&services)
                ),
            )
            .await;
        outbox
            .send_buttons(
                phone,
                "What would you like to do?",
                &[
                    ReplyButton::new(BTN_GO_ONLINE, "🟢 Go Online"),
                    ReplyButton::new(BTN_GO_OFFLINE, "🔴 Go Offline"),
                    ReplyButton::new(BTN_SETTINGS, "⚙️ Settings"),
                ],
            )
            .await;
        self.market
            .sessions
            .put_state(
                phone,
                &ProviderState::Registered {
                    identity: ProviderIdentity {
                        user_id: user.id,
                        provider_id: profile.id,
                        name,
                    },
                },
            )
            .await?;
        Ok(())
    }

    async fn handle_idle(
        &self,
        event: &InboundEvent,
        identity: ProviderIdentity,
    ) -> Result<(), FlowError> {
        let phone = event.sender_phone.as_str();
        if let Some(command) = idle_command(event) {
            return match command {
                IdleCommand::Availability(online) => {
                    self.set_availability(phone, identity, online).await
                }
                IdleCommand::Requests => self.show_requests(phone, &identity).await,
                IdleCommand::Stats => self.show_stats(phone, &identity).await,
                IdleCommand::Settings => self.show_settings(phone).await,
            };
        }
        if event.button_id() == Some(BTN_CHAT_CUSTOMER) {
            return self.start_chat(phone, identity).await;
        }

        if let Some(chat) = self.market.relay.session(phone).await? {
            if chat.role_of(phone) == Some(ChatRole::Provider) {
                let request_id = chat.request_id;
                let customer_name = chat.customer_name.clone();
                self.market
                    .sessions
                    .put_state(
                        phone,
                        &ProviderState::ChatActive {
                            identity: identity.clone(),
                            request_id,
                            customer_name: customer_name.clone(),
                        },
                    )
                    .await?;
                return self
                    .handle_chat(event, identity, request_id, &customer_name)
                    .await;
            }
        }

        let text = if event.button_id().is_some() {
            "🤔 Unknown action. Type \"help\" for available commands."
        } else {
            "👋 Hello! Use these commands:\n\n\
             🟢 *\"go online\"* — Make yourself available\n\
             🔴 *\"go offline\"* — Go offline\n\
             📋 *\"my requests\"* — View your requests\n\
             📊 *\"my stats\"* — View your statistics\n\
             ⚙️ *\"settings\"* — Update your profile\n\
             ❓ *\"help\"* — Show help"
        };
        self.market.outbox.send_text(phone, text).await;
        Ok(())
    }

    async fn set_availability(
        &self,
        phone: &str,
        identity: ProviderIdentity,
        online: bool,
    ) -> Result<(), FlowError> {
        if !self
            .market
            .store
            .set_provider_online(identity.provider_id, online)
            .await?
        {
            self.market
                .outbox
                .send_text(phone, "❌ Provider profile not found.")
                .await;
            return Ok(());
        }

        let text = if online {
            "🟢 You're now 🟢 online and visible to customers."
        } else {
            "🔴 You're now 🔴 offline and hidden from customers."
        };
        self.market.outbox.send_text(phone, text).await;
        self.market
            .sessions
            .put_state(phone, &ProviderState::Idle { identity })
            .await?;
        Ok(())
    }

    async fn show_requests(&self, phone: &str, identity: &ProviderIdentity) -> Result<(), FlowError> {
        let requests = self
            .market
            .store
            .list_requests_for_provider(identity.provider_id, REQUEST_LIST_LIMIT)
            .await?;
        if requests.is_empty() {
            self.market
                .outbox
                .send_text(
                    phone,
                    "📭 You don't have any requests yet.\n\nMake sure you're online to receive requests!",
                )
                .await;
            return Ok(());
        }

        let mut text = String::from("📋 *Your Requests:*\n\n");
        for summary in &requests {
            let request = &summary.request;
            text.push_str(&format!(
                "{}\n   Customer: {}\n   Status: {}\n",
                request_heading(request),
                summary.customer_name,
                request.status.label()
            ));
            if !request.address.is_empty() {
                text.push_str(&format!("   📍 {}\n", request.address));
            }
            text.push_str(&format!("   📅 {}\n\n", format_date(request.created_at)));
        }
        self.market.outbox.send_text(phone, text).await;
        Ok(())
    }

    async fn show_stats(&self, phone: &str, identity: &ProviderIdentity) -> Result<(), FlowError> {
        let Some(stats) = self.market.store.provider_stats(identity.provider_id).await? else {
            self.market
                .outbox
                .send_text(phone, "❌ Provider profile not found.")
                .await;
            return Ok(());
        };

        let (status_emoji, status) = if stats.is_online {
            ("🟢", "Online")
        } else {
            ("🔴", "Offline")
        };
        self.market
            .outbox
            .send_text(
                phone,
                format!(
                    "📊 *Your Statistics:*\n\n⭐ Rating: {:.1}/5.0\n📋 Total Jobs: {}\n✅ Completed: {}\n{status_emoji} Status: {status}\n",
                    stats.rating_average, stats.total_jobs, stats.completed_jobs
                ),
            )
            .await;
        Ok(())
    }

    async fn show_settings(&self, phone: &str) -> Result<(), FlowError> {
        self.market
            .outbox
            .send_text(
                phone,
                "⚙️ *Settings*\n\nSettings update coming soon!\n\nFor now, you can:\n\
                 • Toggle availability (go online/offline)\n\
                 • View your stats (my stats)\n\
                 • View requests (my requests)",
            )
            .await;
        Ok(())
    }

    async fn handle_offer_response(
        &self,
        event: &InboundEvent,
        identity: ProviderIdentity,
        offer: PendingOffer,
    ) -> Result<(), FlowError> {
        let phone = event.sender_phone.as_str();
        let offers = &self.market.offers;
        let resolution = if event.is_command(&["accept", "yes"], BTN_ACCEPT_REQUEST) {
            offers.accept(offer.assignment_id).await?
        } else if event.is_command(&["decline", "no"], BTN_DECLINE_REQUEST) {
            offers.decline(offer.assignment_id).await?
        } else {
            self.market
                .outbox
                .send_text(
                    phone,
                    "🤔 Please tap Accept or Decline on the request notification, or type \"accept\" or \"decline\".",
                )
                .await;
            return Ok(());
        };

        if resolution == OfferResolution::AlreadyResolved {
            self.market
                .outbox
                .send_text(phone, "⏱ This request is no longer available.")
                .await;
        }
        self.market
            .sessions
            .put_state(phone, &ProviderState::Idle { identity })
            .await?;
        Ok(())
    }

    async fn start_chat(&self, phone: &str, identity: ProviderIdentity) -> Result<(), FlowError> {
        let store = &self.market.store;
        let requests = store
            .list_requests_for_provider(identity.provider_id, REQUEST_LIST_LIMIT)
            .await?;
        let Some(summary) = requests
            .into_iter()
            .find(|summary| CHATTABLE_STATUSES.contains(&summary.request.status))
        else {
            self.market
                .outbox
                .send_text(
                    phone,
                    "❌ Chat is not available. The request must be accepted first.",
                )
                .await;
            return Ok(());
        };
        let request = summary.request;

        let existing = self
            .market
            .relay
            .session(phone)
            .await?
            .filter(|chat| chat.request_id == request.id);
        let customer_name = match existing {
            Some(chat) => {
                self.market
                    .outbox
                    .send_text(
                        phone,
                        format!(
                            "💬 You're connected with {}. Send your message.",
                            chat.customer_name
                        ),
                    )
                    .await;
                chat.customer_name
            }
            None => {
                let Some(customer) = store.get_user(request.customer_id).await? else {
                    self.market
                        .outbox
                        .send_text(phone, "❌ Customer not found.")
                        .await;
                    return Ok(());
                };
                self.market
                    .relay
                    .start(
                        request.id,
                        &customer.phone,
                        phone,
                        &customer.name,
                        &identity.name,
                    )
                    .await?;
                customer.name
            }
        };

        self.market
            .sessions
            .put_state(
                phone,
                &ProviderState::ChatActive {
                    identity,
                    request_id: request.id,
                    customer_name,
                },
            )
            .await?;
        Ok(())
    }

    async fn handle_chat(
        &self,
        event: &InboundEvent,
        identity: ProviderIdentity,
        request_id: Uuid,
        customer_name: &str,
    ) -> Result<(), FlowError> {
        let phone = event.sender_phone.as_str();
        let relay = &self.market.relay;
        let keyword = event.keyword();

        match keyword.as_deref() {
            Some("end chat" | "cerrar chat") => {
                relay.end(request_id, phone).await?;
                return self.return_to_idle(phone, identity).await;
            }
            Some("complete" | "completar") => {
                return match relay.mark_complete(request_id, phone).await? {
                    CompletionOutcome::NotCompletable => {
                        self.market
                            .outbox
                            .send_text(phone, "❌ This request can't be marked as completed.")
                            .await;
                        Ok(())
                    }
                    CompletionOutcome::Completed(_) | CompletionOutcome::CompletedWithoutChat => {
                        self.return_to_idle(phone, identity).await
                    }
                };
            }
            _ => {}
        }

        if event.button_id() == Some(BTN_CHAT_CUSTOMER) {
            self.market
                .outbox
                .send_text(
                    phone,
                    format!("💬 You're already chatting with {customer_name}."),
                )
                .await;
            return Ok(());
        }

        if relay.relay(phone, event).await? == RelayOutcome::NoActiveSession {
            self.market
                .outbox
                .send_text(
                    phone,
                    "💬 Chat session has ended.\n\nType \"menu\" to return to your dashboard.",
                )
                .await;
            return self.return_to_idle(phone, identity).await;
        }
        Ok(())
    }

    async fn return_to_idle(&self, phone: &str, identity: ProviderIdentity) -> Result<(), FlowError> {
        self.market
            .sessions
            .put_state(phone, &ProviderState::Idle { identity })
            .await?;
        Ok(())
    }

    async fn registered_identity(
        &self,
        user: Option<&User>,
    ) -> Result<Option<ProviderIdentity>, FlowError> {
        let Some(user) = user.filter(|user| user.role == Role::Provider) else {
            return Ok(None);
        };
        let profile = self.market.store.find_provider_by_user(user.id).await?;
        Ok(profile.map(|profile| ProviderIdentity {
            user_id: user.id,
            provider_id: profile.id,
            name: user.name.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use std::time::Duration;

    use super::{
        IdleCommand, PendingOffer, ProviderIdentity, ProviderState, help_text, idle_command,
    };
    use crate::inbound::InboundEvent;
    use crate::session::{SessionRecord, decode_state, encode_state};

    #[test]
    fn idle_commands_accept_text_and_buttons() {
        let text = InboundEvent::text("1", "P", "  Go Online ");
        assert_eq!(idle_command(&text), Some(IdleCommand::Availability(true)));
        let button = InboundEvent::button("1", "P", "btn_go_offline");
        assert_eq!(idle_command(&button), Some(IdleCommand::Availability(false)));
        let stats = InboundEvent::text("1", "P", "stats");
        assert_eq!(idle_command(&stats), Some(IdleCommand::Stats));
        assert_eq!(idle_command(&InboundEvent::text("1", "P", "hello")), None);
    }

    #[test]
    fn help_announces_the_configured_offer_window() {
        assert!(help_text(Duration::from_secs(300)).ends_with("within 5 minutes."));
        assert!(help_text(Duration::from_secs(90)).ends_with("within 90 seconds."));
    }

    #[test]
    fn parked_offer_state_round_trips() {
        let state = ProviderState::AwaitingRequestResponse {
            identity: ProviderIdentity {
                user_id: Uuid::new_v4(),
                provider_id: Uuid::new_v4(),
                name: "Roberto".to_string(),
            },
            offer: PendingOffer {
                request_id: Uuid::new_v4(),
                assignment_id: Uuid::new_v4(),
                customer_name: "Ana".to_string(),
            },
        };
        let (tag, data) = encode_state(&state).expect("state should encode");
        assert_eq!(tag, "AWAITING_REQUEST_RESPONSE");
        assert!(ProviderState::is_exclusive_tag(&tag));

        let record = SessionRecord {
            phone_number: "1".to_string(),
            state: tag,
            data,
            updated_at: chrono::Utc::now(),
        };
        assert_eq!(decode_state::<ProviderState>(&record), Some(state));
    }

    #[test]
    fn missing_fields_fail_to_decode() {
        let mut data = serde_json::Map::new();
        data.insert("name".to_string(), json!("Roberto"));
        let record = SessionRecord {
            phone_number: "1".to_string(),
            state: "IDLE".to_string(),
            data,
            updated_at: chrono::Utc::now(),
        };
        assert_eq!(decode_state::<ProviderState>(&record), None);
    }
}
