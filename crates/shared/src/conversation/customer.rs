use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::{SERVICE_ROW_PREFIX, ServiceCategory, service_list_prompt};
use crate::directory::{format_provider_card, parse_provider_row_id, provider_list_prompt};
use crate::inbound::{InboundEvent, InboundKind};
use crate::messaging::{ListPrompt, ReplyButton};
use crate::models::{NewRating, NewServiceRequest, NewUser, RequestStatus, Role, ServiceRequest, User};
use crate::redact::phone_label;
use crate::relay::{ChatRole, RelayOutcome, parse_rating_row_id};
use crate::session::{SessionRecord, decode_state};

use super::offers::{OPEN_REQUEST_STATUSES, OfferDispatch, OfferRequest};
use super::{
    CHATTABLE_STATUSES, FlowError, Marketplace, description_line, format_date, name_problem,
    request_heading,
};

pub const BTN_NEW_SERVICE: &str = "btn_new_service";
pub const BTN_MY_REQUESTS: &str = "btn_my_requests";
pub const BTN_HELP: &str = "btn_help";
pub const BTN_TRY_ANOTHER: &str = "btn_try_another";
pub const BTN_CANCEL: &str = "btn_cancel";
pub const BTN_BOOK_PROVIDER: &str = "btn_book_provider";
pub const BTN_BACK_TO_LIST: &str = "btn_back_to_list";
pub const BTN_START_CHAT: &str = "btn_start_chat";
pub const BTN_SEE_OTHER_PROVIDERS: &str = "btn_see_other_providers";
pub const BTN_CANCEL_REQUEST: &str = "btn_cancel_request";

pub(crate) const MIN_ADDRESS_CHARS: usize = 3;
const RECENT_REQUEST_LIMIT: i64 = 5;
const SHARED_LOCATION_LABEL: &str = "Shared Location";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerIdentity {
    pub user_id: Uuid,
    pub name: String,
}

impl From<&User> for CustomerIdentity {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            name: user.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChosenProvider {
    pub provider_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingLocation {
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CustomerState {
    New,
    Welcome {
        customer: CustomerIdentity,
    },
    AwaitingServiceSelection {
        #[serde(default)]
        customer: Option<CustomerIdentity>,
    },
    AwaitingName {
        service: ServiceCategory,
    },
    /// Listing came back empty right after picking a service.
    ServiceSelected {
        customer: CustomerIdentity,
        service: ServiceCategory,
    },
    /// Listing came back empty right after registering.
    Registered {
        customer: CustomerIdentity,
        service: ServiceCategory,
    },
    ProviderList {
        customer: CustomerIdentity,
        service: ServiceCategory,
    },
    ProviderDetail {
        customer: CustomerIdentity,
        service: ServiceCategory,
        provider: ChosenProvider,
    },
    AwaitingLocation {
        customer: CustomerIdentity,
        service: ServiceCategory,
        provider: ChosenProvider,
    },
    AwaitingDescription {
        customer: CustomerIdentity,
        service: ServiceCategory,
        provider: ChosenProvider,
        location: BookingLocation,
        /// Id the request is inserted under, fixed before the insert.
        request_id: Uuid,
    },
    BookingConfirmed {
        customer: CustomerIdentity,
        service: ServiceCategory,
        provider: ChosenProvider,
        request_id: Uuid,
    },
    ChatActive {
        customer: CustomerIdentity,
        request_id: Uuid,
        provider_name: String,
    },
    Rating {
        customer: CustomerIdentity,
        request_id: Uuid,
        stars: i32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EmptyListing {
    AfterSelection,
    AfterRegistration,
}

/// Buttons offered when a provider declines or lets an offer lapse.
pub(crate) fn retry_buttons() -> [ReplyButton; 2] {
    [
        ReplyButton::new(BTN_SEE_OTHER_PROVIDERS, "🔄 See Other Providers"),
        ReplyButton::new(BTN_CANCEL_REQUEST, "❌ Cancel Request"),
    ]
}

fn customer_service_list() -> ListPrompt {
    service_list_prompt(
        "Our Services",
        "We offer a wide range of professional services. Tap the button below to browse and select.",
        "Browse Services",
    )
}

/// Conversation machine for customer phones.
#[derive(Clone)]
pub struct CustomerFlow {
    market: Marketplace,
}

impl CustomerFlow {
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
        let known = user.as_ref().map(CustomerIdentity::from);
        let state = match session {
            None => CustomerState::New,
            Some(record) => match decode_state::<CustomerState>(&record) {
                Some(state) => state,
                None => {
                    warn!(
                        phone = %phone_label(phone),
                        state = %record.state,
                        "resetting customer session with unknown state"
                    );
                    self.market.sessions.delete(phone).await?;
                    CustomerState::New
                }
            },
        };

        if let Some((stars, request_id)) = event.list_id().and_then(parse_rating_row_id) {
            return self.begin_rating(phone, known, request_id, stars).await;
        }

        match event.keyword().as_deref() {
            Some("menu" | "start") => {
                self.leave_chat(phone, &state).await?;
                return self.show_menu(phone, known).await;
            }
            Some("help") => return self.send_help(phone).await,
            Some("cancel") => {
                self.leave_chat(phone, &state).await?;
                return self.cancel(phone).await;
            }
            _ => {}
        }

        match event.button_id() {
            Some(BTN_START_CHAT) => return self.start_chat(phone, known).await,
            Some(BTN_SEE_OTHER_PROVIDERS) => {
                return self.see_other_providers(phone, &state, known).await;
            }
            Some(BTN_CANCEL_REQUEST) => return self.cancel_request(phone, &state, known).await,
            _ => {}
        }

        let state = match state {
            CustomerState::New | CustomerState::BookingConfirmed { .. } => {
                self.adopt_chat(phone, state, known.as_ref()).await?
            }
            other => other,
        };

        match state {
            CustomerState::New => self.handle_new(phone, known).await,
            CustomerState::Welcome { customer } => self.select_service(event, Some(customer)).await,
            CustomerState::AwaitingServiceSelection { customer } => {
                self.select_service(event, customer.or(known)).await
            }
            CustomerState::AwaitingName { service } => self.handle_name(event, service, known).await,
            CustomerState::ServiceSelected { customer, service } => {
                self.handle_empty_listing(event, customer, service, EmptyListing::AfterSelection)
                    .await
            }
            CustomerState::Registered { customer, service } => {
                self.handle_empty_listing(event, customer, service, EmptyListing::AfterRegistration)
                    .await
            }
            CustomerState::ProviderList { customer, service } => {
                self.choose_provider(event, customer, service).await
            }
            CustomerState::ProviderDetail {
                customer,
                service,
                provider,
            } => self.detail_action(event, customer, service, provider).await,
            CustomerState::AwaitingLocation {
                customer,
                service,
                provider,
            } => self.handle_location(event, customer, service, provider).await,
            CustomerState::AwaitingDescription {
                customer,
                service,
                provider,
                location,
                request_id,
            } => {
                self.handle_description(event, customer, service, provider, location, request_id)
                    .await
            }
            CustomerState::BookingConfirmed {
                service,
                provider,
                request_id,
                ..
            } => self.restate_booking(phone, service, &provider, request_id).await,
            CustomerState::ChatActive {
                request_id,
                provider_name,
                ..
            } => self.handle_chat(event, request_id, &provider_name).await,
            CustomerState::Rating {
                customer,
                request_id,
                stars,
            } => self.finish_rating(event, customer, request_id, stars).await,
        }
    }

    async fn handle_new(&self, phone: &str, known: Option<CustomerIdentity>) -> Result<(), FlowError> {
        let outbox = &self.market.outbox;
        let Some(customer) = known else {
            outbox
                .send_text(
                    phone,
                    "👋 Welcome to *Handy*!\n\nWe connect you with trusted local service providers.\n\nWhat can we help you with today?",
                )
                .await;
            outbox.send_list(phone, customer_service_list()).await;
            self.market
                .sessions
                .put_state(phone, &CustomerState::AwaitingServiceSelection { customer: None })
                .await?;
            return Ok(());
        };

        let active = self
            .market
            .store
            .find_active_request_for_customer(customer.user_id)
            .await?;
        let new_service_title = match &active {
            Some(request) => {
                let mut text = format!(
                    "👋 Welcome back, {}!\n\nYou have an active request:\n\n{}\nStatus: {}",
                    customer.name,
                    request_heading(request),
                    request.status.label()
                );
                if !request.address.is_empty() {
                    text.push_str(&format!("\n📍 {}", request.address));
                }
                outbox.send_text(phone, text).await;
                "📋 New Service"
            }
            None => {
                outbox
                    .send_text(
                        phone,
                        format!("👋 Welcome back, {}! Great to see you again.", customer.name),
                    )
                    .await;
                "📋 Book a Service"
            }
        };
        outbox
            .send_buttons(
                phone,
                "What would you like to do?",
                &[
                    ReplyButton::new(BTN_NEW_SERVICE, new_service_title),
                    ReplyButton::new(BTN_MY_REQUESTS, "📄 My Requests"),
                    ReplyButton::new(BTN_HELP, "❓ Help"),
                ],
            )
            .await;
        self.market
            .sessions
            .put_state(phone, &CustomerState::Welcome { customer })
            .await?;
        Ok(())
    }

    async fn select_service(
        &self,
        event: &InboundEvent,
        customer: Option<CustomerIdentity>,
    ) -> Result<(), FlowError> {
        let phone = event.sender_phone.as_str();
        let outbox = &self.market.outbox;

        match event.button_id() {
            Some(BTN_NEW_SERVICE) => {
                outbox.send_list(phone, customer_service_list()).await;
                self.market
                    .sessions
                    .put_state(phone, &CustomerState::AwaitingServiceSelection { customer })
                    .await?;
                return Ok(());
            }
            Some(BTN_MY_REQUESTS) => return self.show_my_requests(phone, customer.as_ref()).await,
            Some(BTN_HELP) => return self.send_help(phone).await,
            _ => {}
        }

        let chosen = match event.list_id() {
            Some(row_id) if row_id.starts_with(SERVICE_ROW_PREFIX) => {
                let Some(service) = ServiceCategory::from_row_id(row_id) else {
                    outbox
                        .send_text(
                            phone,
                            "❌ Sorry, that service is not available. Please select from the list.",
                        )
                        .await;
                    outbox.send_list(phone, customer_service_list()).await;
                    return Ok(());
                };
                Some(service)
            }
            _ => event
                .keyword()
                .and_then(|text| ServiceCategory::match_text(&text)),
        };

        let Some(service) = chosen else {
            outbox
                .send_text(
                    phone,
                    "🤔 I didn't understand that. Please select a service from the list below, or type \"help\" for assistance.",
                )
                .await;
            outbox.send_list(phone, customer_service_list()).await;
            return Ok(());
        };

        match customer {
            Some(customer) => {
                outbox
                    .send_text(
                        phone,
                        format!(
                            "✅ Great choice! You selected: {}\n\n🔍 Searching for available providers...",
                            service.title()
                        ),
                    )
                    .await;
                self.show_providers(phone, customer, service, EmptyListing::AfterSelection)
                    .await
            }
            None => {
                outbox
                    .send_text(
                        phone,
                        format!(
                            "✅ Great choice! You selected: {}\n\nBefore we find you a provider, what's your name?",
                            service.title()
                        ),
                    )
                    .await;
                self.market
                    .sessions
                    .put_state(phone, &CustomerState::AwaitingName { service })
                    .await?;
                Ok(())
            }
        }
    }

    async fn handle_name(
        &self,
        event: &InboundEvent,
        service: ServiceCategory,
        known: Option<CustomerIdentity>,
    ) -> Result<(), FlowError> {
        let phone = event.sender_phone.as_str();
        let outbox = &self.market.outbox;

        let customer = match known {
            Some(customer) => customer,
            None => {
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

                let user = self
                    .market
                    .store
                    .create_user(NewUser {
                        name: name.to_string(),
                        phone: phone.to_string(),
                        role: Role::Customer,
                        whatsapp_name: Some(event.sender_name.clone()),
                    })
                    .await?;
                info!(user_id = %user.id, phone = %phone_label(phone), "customer registered");
                CustomerIdentity::from(&user)
            }
        };

        outbox
            .send_text(
                phone,
                format!(
                    "🎉 Nice to meet you, {}!\n\n🔍 Now searching for {} providers...",
                    customer.name,
                    service.title()
                ),
            )
            .await;
        self.show_providers(phone, customer, service, EmptyListing::AfterRegistration)
            .await
    }

    async fn show_providers(
        &self,
        phone: &str,
        customer: CustomerIdentity,
        service: ServiceCategory,
        when_empty: EmptyListing,
    ) -> Result<(), FlowError> {
        let providers = self.market.directory.list(service).await?;
        let outbox = &self.market.outbox;

        if providers.is_empty() {
            outbox
                .send_text(
                    phone,
                    format!(
                        "😕 No providers available for {} right now.\n\nWould you like to:",
                        service.title()
                    ),
                )
                .await;
            outbox
                .send_buttons(
                    phone,
                    "Choose an option:",
                    &[
                        ReplyButton::new(BTN_TRY_ANOTHER, "🔄 Try Another"),
                        ReplyButton::new(BTN_CANCEL, "❌ Cancel"),
                    ],
                )
                .await;
            let state = match when_empty {
                EmptyListing::AfterSelection => CustomerState::ServiceSelected { customer, service },
                EmptyListing::AfterRegistration => CustomerState::Registered { customer, service },
            };
            self.market.sessions.put_state(phone, &state).await?;
            return Ok(());
        }

        outbox
            .send_list(phone, provider_list_prompt(service, &providers))
            .await;
        self.market
            .sessions
            .put_state(phone, &CustomerState::ProviderList { customer, service })
            .await?;
        Ok(())
    }

    async fn handle_empty_listing(
        &self,
        event: &InboundEvent,
        customer: CustomerIdentity,
        service: ServiceCategory,
        when_empty: EmptyListing,
    ) -> Result<(), FlowError> {
        let phone = event.sender_phone.as_str();
        match event.button_id() {
            Some(BTN_TRY_ANOTHER) => {
                self.market
                    .outbox
                    .send_list(phone, customer_service_list())
                    .await;
                self.market
                    .sessions
                    .put_state(
                        phone,
                        &CustomerState::AwaitingServiceSelection {
                            customer: Some(customer),
                        },
                    )
                    .await?;
                Ok(())
            }
            Some(BTN_CANCEL) => self.cancel(phone).await,
            _ => self.show_providers(phone, customer, service, when_empty).await,
        }
    }

    async fn choose_provider(
        &self,
        event: &InboundEvent,
        customer: CustomerIdentity,
        service: ServiceCategory,
    ) -> Result<(), FlowError> {
        let phone = event.sender_phone.as_str();
        let outbox = &self.market.outbox;
        let Some(provider_id) = event.list_id().and_then(parse_provider_row_id) else {
            outbox
                .send_text(
                    phone,
                    "🤔 Please select a provider from the list above, or type \"menu\" to start over.",
                )
                .await;
            return Ok(());
        };

        let Some(card) = self.market.directory.card(provider_id).await? else {
            outbox
                .send_text(phone, "❌ Provider not found. Please try again.")
                .await;
            return self
                .show_providers(phone, customer, service, EmptyListing::AfterSelection)
                .await;
        };

        outbox.send_text(phone, format_provider_card(&card)).await;
        outbox
            .send_buttons(
                phone,
                "What would you like to do?",
                &[
                    ReplyButton::new(BTN_BOOK_PROVIDER, "✅ Book Provider"),
                    ReplyButton::new(BTN_BACK_TO_LIST, "🔙 Back to List"),
                    ReplyButton::new(BTN_CANCEL, "❌ Cancel"),
                ],
            )
            .await;
        self.market
            .sessions
            .put_state(
                phone,
                &CustomerState::ProviderDetail {
                    customer,
                    service,
                    provider: ChosenProvider {
                        provider_id: card.detail.provider_id,
                        user_id: card.detail.user_id,
                        name: card.detail.name,
                    },
                },
            )
            .await?;
        Ok(())
    }

    async fn detail_action(
        &self,
        event: &InboundEvent,
        customer: CustomerIdentity,
        service: ServiceCategory,
        provider: ChosenProvider,
    ) -> Result<(), FlowError> {
        let phone = event.sender_phone.as_str();
        if event.is_command(&["book"], BTN_BOOK_PROVIDER) {
            self.market
                .outbox
                .send_text(
                    phone,
                    "📍 Please share your location or type your address where you need the service.",
                )
                .await;
            self.market
                .sessions
                .put_state(
                    phone,
                    &CustomerState::AwaitingLocation {
                        customer,
                        service,
                        provider,
                    },
                )
                .await?;
            return Ok(());
        }

        match event.button_id() {
            Some(BTN_BACK_TO_LIST) => {
                self.show_providers(phone, customer, service, EmptyListing::AfterSelection)
                    .await
            }
            Some(BTN_CANCEL) => self.cancel(phone).await,
            _ => {
                self.market
                    .outbox
                    .send_text(
                        phone,
                        "🤔 Please tap one of the buttons above, or type \"menu\" to start over.",
                    )
                    .await;
                Ok(())
            }
        }
    }

    async fn handle_location(
        &self,
        event: &InboundEvent,
        customer: CustomerIdentity,
        service: ServiceCategory,
        provider: ChosenProvider,
    ) -> Result<(), FlowError> {
        let phone = event.sender_phone.as_str();
        let location = match &event.kind {
            InboundKind::Location {
                latitude,
                longitude,
                name,
                address,
            } => {
                let address = address
                    .as_deref()
                    .filter(|value| !value.trim().is_empty())
                    .or(name.as_deref().filter(|value| !value.trim().is_empty()))
                    .unwrap_or(SHARED_LOCATION_LABEL);
                Some(BookingLocation {
                    address: address.to_string(),
                    latitude: *latitude,
                    longitude: *longitude,
                })
            }
            InboundKind::Text { .. } => event
                .text_body()
                .filter(|text| text.chars().count() >= MIN_ADDRESS_CHARS)
                .map(|text| BookingLocation {
                    address: text.to_string(),
                    latitude: 0.0,
                    longitude: 0.0,
                }),
            _ => None,
        };

        let Some(location) = location else {
            self.market
                .outbox
                .send_text(
                    phone,
                    "📍 Please share your WhatsApp location or type your address (at least 3 characters).",
                )
                .await;
            return Ok(());
        };

        self.market
            .outbox
            .send_text(
                phone,
                "📝 Briefly describe what you need (or send *\"skip\"* to continue):",
            )
            .await;
        self.market
            .sessions
            .put_state(
                phone,
                &CustomerState::AwaitingDescription {
                    customer,
                    service,
                    provider,
                    location,
                    request_id: Uuid::new_v4(),
                },
            )
            .await?;
        Ok(())
    }

    async fn handle_description(
        &self,
        event: &InboundEvent,
        customer: CustomerIdentity,
        service: ServiceCategory,
        provider: ChosenProvider,
        location: BookingLocation,
        request_id: Uuid,
    ) -> Result<(), FlowError> {
        let phone = event.sender_phone.as_str();
        let outbox = &self.market.outbox;
        let Some(text) = event.text_body() else {
            outbox
                .send_text(phone, "📝 Please type a description or send \"skip\" to continue.")
                .await;
            return Ok(());
        };
        let description = if text.eq_ignore_ascii_case("skip") {
            String::new()
        } else {
            text.to_string()
        };

        let request = self
            .market
            .store
            .create_service_request(NewServiceRequest {
                id: request_id,
                customer_id: customer.user_id,
                service_type: service,
                origin_lat: location.latitude,
                origin_lng: location.longitude,
                address: location.address.clone(),
                description: description.clone(),
                provider_id: provider.provider_id,
            })
            .await?;
        info!(
            request_id = %request.id,
            provider_id = %provider.provider_id,
            "service request created"
        );
        self.market
            .sessions
            .put_state(
                phone,
                &CustomerState::BookingConfirmed {
                    customer: customer.clone(),
                    service,
                    provider: provider.clone(),
                    request_id: request.id,
                },
            )
            .await?;

        outbox
            .send_text(
                phone,
                format!(
                    "✅ *Request Created!*\n\n🛠 Service: {}\n👤 Provider: {}\n📍 Address: {}\n{}\nWe're notifying the provider now. You'll receive a confirmation shortly!",
                    service.title(),
                    provider.name,
                    location.address,
                    description_line(&description)
                ),
            )
            .await;

        let offer = OfferRequest {
            request_id: request.id,
            provider_id: provider.provider_id,
            customer_phone: phone.to_string(),
            customer_name: customer.name,
            service,
            address: location.address,
            description,
        };
        let reached = match self.market.offers.notify_provider(&offer).await {
            Ok(OfferDispatch::Sent { .. }) => true,
            Ok(OfferDispatch::ProviderUnavailable) => false,
            Err(err) => {
                warn!(request_id = %request.id, "failed to notify provider: {err}");
                false
            }
        };
        if !reached {
            outbox
                .send_text(
                    phone,
                    "😕 The provider is currently unavailable.\n\nWould you like to try another provider?",
                )
                .await;
            outbox
                .send_buttons(phone, "Choose an option:", &retry_buttons())
                .await;
        }
        Ok(())
    }

    async fn restate_booking(
        &self,
        phone: &str,
        service: ServiceCategory,
        provider: &ChosenProvider,
        request_id: Uuid,
    ) -> Result<(), FlowError> {
        let status = self
            .market
            .store
            .get_service_request(request_id)
            .await?
            .map(|request| request.status);
        let text = match status {
            Some(RequestStatus::Created | RequestStatus::Searching) | None => format!(
                "📋 Your request for *{}* with *{}* has been submitted!\n\nWe'll notify you when the provider responds.\n\nType \"menu\" to book another service or \"help\" for assistance.",
                service.title(),
                provider.name
            ),
            Some(status) => format!(
                "📋 Your request for *{}* with *{}* is now: {} {}\n\nType \"menu\" to book another service or \"help\" for assistance.",
                service.title(),
                provider.name,
                status.emoji(),
                status.label()
            ),
        };
        self.market.outbox.send_text(phone, text).await;
        Ok(())
    }

    /// Moves a resting customer with a live chat bridge into the chat.
    async fn adopt_chat(
        &self,
        phone: &str,
        state: CustomerState,
        known: Option<&CustomerIdentity>,
    ) -> Result<CustomerState, FlowError> {
        let Some(customer) = known else {
            return Ok(state);
        };
        let Some(chat) = self.market.relay.session(phone).await? else {
            return Ok(state);
        };
        if chat.role_of(phone) != Some(ChatRole::Customer) {
            return Ok(state);
        }

        let adopted = CustomerState::ChatActive {
            customer: customer.clone(),
            request_id: chat.request_id,
            provider_name: chat.provider_name,
        };
        self.market.sessions.put_state(phone, &adopted).await?;
        Ok(adopted)
    }

    async fn handle_chat(
        &self,
        event: &InboundEvent,
        request_id: Uuid,
        provider_name: &str,
    ) -> Result<(), FlowError> {
        let phone = event.sender_phone.as_str();
        let relay = &self.market.relay;

        if matches!(event.keyword().as_deref(), Some("end chat" | "cerrar chat")) {
            if relay.end(request_id, phone).await?.is_none() {
                self.send_chat_closed(phone).await;
            }
            self.market.sessions.delete(phone).await?;
            return Ok(());
        }

        match relay.relay(phone, event).await? {
            RelayOutcome::Relayed { .. } => Ok(()),
            RelayOutcome::NoActiveSession => {
                info!(
                    request_id = %request_id,
                    provider = %provider_name,
                    "customer chat no longer live"
                );
                self.send_chat_closed(phone).await;
                self.market.sessions.delete(phone).await?;
                Ok(())
            }
        }
    }

    async fn send_chat_closed(&self, phone: &str) {
        self.market
            .outbox
            .send_text(
                phone,
                "💬 Chat session has ended.\n\nType \"menu\" to start a new service request.",
            )
            .await;
    }

    async fn leave_chat(&self, phone: &str, state: &CustomerState) -> Result<(), FlowError> {
        if let CustomerState::ChatActive { request_id, .. } = state {
            self.market.relay.end(*request_id, phone).await?;
        }
        Ok(())
    }

    async fn start_chat(&self, phone: &str, known: Option<CustomerIdentity>) -> Result<(), FlowError> {
        let outbox = &self.market.outbox;
        let Some(customer) = known else {
            return self.handle_new(phone, None).await;
        };
        let Some(request) = self
            .recent_request(customer.user_id, &CHATTABLE_STATUSES)
            .await?
        else {
            outbox
                .send_text(
                    phone,
                    "❌ Chat is not available. The request must be accepted first.",
                )
                .await;
            return Ok(());
        };

        let existing = self
            .market
            .relay
            .session(phone)
            .await?
            .filter(|chat| chat.request_id == request.id);
        let provider_name = match existing {
            Some(chat) => {
                outbox
                    .send_text(
                        phone,
                        format!(
                            "💬 You're connected with {}. Send your message.",
                            chat.provider_name
                        ),
                    )
                    .await;
                chat.provider_name
            }
            None => {
                let provider = match request.provider_id {
                    Some(provider_id) => {
                        self.market.store.get_provider_detail(provider_id).await?
                    }
                    None => None,
                };
                let Some(provider) = provider else {
                    outbox.send_text(phone, "❌ Provider not found.").await;
                    return Ok(());
                };
                self.market
                    .relay
                    .start(
                        request.id,
                        phone,
                        &provider.phone,
                        &customer.name,
                        &provider.name,
                    )
                    .await?;
                provider.name
            }
        };

        self.market
            .sessions
            .put_state(
                phone,
                &CustomerState::ChatActive {
                    customer,
                    request_id: request.id,
                    provider_name,
                },
            )
            .await?;
        Ok(())
    }

    /// Withdraws a still-open request from its provider and lists the
    /// category again. A request the offer timer already cancelled counts as
    /// withdrawn.
    async fn see_other_providers(
        &self,
        phone: &str,
        state: &CustomerState,
        known: Option<CustomerIdentity>,
    ) -> Result<(), FlowError> {
        let Some(customer) = known else {
            return self.handle_new(phone, None).await;
        };
        let Some(request) = self
            .withdraw_open_request(phone, state, &customer, true)
            .await?
        else {
            return Ok(());
        };
        info!(request_id = %request.id, "customer is choosing another provider");
        self.show_providers(phone, customer, request.service_type, EmptyListing::AfterSelection)
            .await
    }

    async fn cancel_request(
        &self,
        phone: &str,
        state: &CustomerState,
        known: Option<CustomerIdentity>,
    ) -> Result<(), FlowError> {
        let Some(customer) = known else {
            return self.handle_new(phone, None).await;
        };
        let Some(request) = self
            .withdraw_open_request(phone, state, &customer, false)
            .await?
        else {
            return Ok(());
        };
        info!(request_id = %request.id, "customer cancelled request");

        self.market.sessions.delete(phone).await?;
        self.market
            .outbox
            .send_text(
                phone,
                "✅ Your request has been cancelled.\n\nType \"menu\" to book another service.",
            )
            .await;
        Ok(())
    }

    /// Cancels the customer's open request together with its pending offers.
    /// `None` (after telling the customer) when nothing was open, unless
    /// `accept_cancelled` and the request is already cancelled.
    async fn withdraw_open_request(
        &self,
        phone: &str,
        state: &CustomerState,
        customer: &CustomerIdentity,
        accept_cancelled: bool,
    ) -> Result<Option<ServiceRequest>, FlowError> {
        let store = &self.market.store;
        let request = match state {
            CustomerState::BookingConfirmed { request_id, .. } => {
                store.get_service_request(*request_id).await?
            }
            _ => {
                self.recent_request(customer.user_id, &OPEN_REQUEST_STATUSES)
                    .await?
            }
        };
        let Some(request) = request.filter(|request| request.customer_id == customer.user_id)
        else {
            self.market
                .outbox
                .send_text(
                    phone,
                    "ℹ️ You don't have a pending request to change.\n\nType \"menu\" to book a service.",
                )
                .await;
            return Ok(None);
        };

        if !store
            .transition_request(request.id, &OPEN_REQUEST_STATUSES, RequestStatus::Cancelled)
            .await?
        {
            let current = store
                .get_service_request(request.id)
                .await?
                .map(|request| request.status)
                .unwrap_or(request.status);
            if accept_cancelled && current == RequestStatus::Cancelled {
                return Ok(Some(request));
            }
            self.market
                .outbox
                .send_text(
                    phone,
                    format!(
                        "ℹ️ This request is already {} {}.",
                        current.emoji(),
                        current.label()
                    ),
                )
                .await;
            return Ok(None);
        }
        store.cancel_pending_assignments(request.id).await?;
        self.market.offers.withdraw(request.id);
        Ok(Some(request))
    }

    async fn begin_rating(
        &self,
        phone: &str,
        known: Option<CustomerIdentity>,
        request_id: Uuid,
        stars: i32,
    ) -> Result<(), FlowError> {
        let request = self.market.store.get_service_request(request_id).await?;
        let rateable = match (&known, &request) {
            (Some(customer), Some(request)) => {
                request.customer_id == customer.user_id && request.status == RequestStatus::Completed
            }
            _ => false,
        };
        let Some(customer) = known.filter(|_| rateable) else {
            self.market
                .outbox
                .send_text(phone, "❌ That rating is no longer available.")
                .await;
            return Ok(());
        };

        self.market
            .outbox
            .send_text(
                phone,
                format!(
                    "{} Thanks! Add a short comment about your experience, or send \"skip\".",
                    crate::directory::star_string(stars)
                ),
            )
            .await;
        self.market
            .sessions
            .put_state(
                phone,
                &CustomerState::Rating {
                    customer,
                    request_id,
                    stars,
                },
            )
            .await?;
        Ok(())
    }

    async fn finish_rating(
        &self,
        event: &InboundEvent,
        customer: CustomerIdentity,
        request_id: Uuid,
        stars: i32,
    ) -> Result<(), FlowError> {
        let phone = event.sender_phone.as_str();
        let outbox = &self.market.outbox;
        let store = &self.market.store;
        let Some(text) = event.text_body() else {
            outbox
                .send_text(phone, "📝 Please type a comment or send \"skip\".")
                .await;
            return Ok(());
        };
        let comment = if text.eq_ignore_ascii_case("skip") {
            String::new()
        } else {
            text.to_string()
        };

        let provider_id = store
            .get_service_request(request_id)
            .await?
            .and_then(|request| request.provider_id);
        let provider = match provider_id {
            Some(provider_id) => store.get_provider_detail(provider_id).await?,
            None => None,
        };
        let Some(provider) = provider else {
            outbox
                .send_text(phone, "❌ That rating is no longer available.")
                .await;
            self.market.sessions.delete(phone).await?;
            return Ok(());
        };

        let recorded = store
            .create_rating(NewRating {
                request_id,
                rater_id: customer.user_id,
                ratee_id: provider.user_id,
                stars,
                comment,
            })
            .await?;
        let text = if recorded {
            info!(request_id = %request_id, stars, "rating recorded");
            "🙏 Thank you for your feedback!\n\nType \"menu\" to book another service."
        } else {
            "ℹ️ You've already rated this service.\n\nType \"menu\" to book another service."
        };
        outbox.send_text(phone, text).await;
        self.market.sessions.delete(phone).await?;
        Ok(())
    }

    async fn show_menu(&self, phone: &str, known: Option<CustomerIdentity>) -> Result<(), FlowError> {
        let text = match &known {
            Some(customer) => format!("📋 Main Menu — What service do you need, {}?", customer.name),
            None => "📋 Main Menu — What service do you need?".to_string(),
        };
        self.market.outbox.send_text(phone, text).await;
        self.market
            .outbox
            .send_list(phone, customer_service_list())
            .await;
        self.market
            .sessions
            .put_state(
                phone,
                &CustomerState::AwaitingServiceSelection { customer: known },
            )
            .await?;
        Ok(())
    }

    async fn send_help(&self, phone: &str) -> Result<(), FlowError> {
        self.market
            .outbox
            .send_text(
                phone,
                "❓ *Handy Help*\n\nHere's what you can do:\n\n\
                 📋 *\"menu\"* — Browse available services\n\
                 ❌ *\"cancel\"* — Cancel and start over\n\
                 ❓ *\"help\"* — Show this help message\n\n\
                 Simply select a service category and we'll connect you with the best local providers, complete with ratings and reviews!\n\n\
                 Need human assistance? Contact us at support@handy.com",
            )
            .await;
        Ok(())
    }

    async fn cancel(&self, phone: &str) -> Result<(), FlowError> {
        self.market.sessions.delete(phone).await?;
        self.market
            .outbox
            .send_text(
                phone,
                "✅ Your current action has been cancelled.\n\nType anything to start over or \"menu\" to see available services.",
            )
            .await;
        Ok(())
    }

    async fn show_my_requests(
        &self,
        phone: &str,
        customer: Option<&CustomerIdentity>,
    ) -> Result<(), FlowError> {
        let outbox = &self.market.outbox;
        let Some(customer) = customer else {
            outbox
                .send_text(
                    phone,
                    "You don't have any requests yet. Type \"menu\" to book a service!",
                )
                .await;
            return Ok(());
        };

        let requests = self
            .market
            .store
            .list_requests_for_customer(customer.user_id, RECENT_REQUEST_LIMIT)
            .await?;
        if requests.is_empty() {
            outbox
                .send_text(
                    phone,
                    "📭 You don't have any requests yet.\n\nType \"menu\" to book your first service!",
                )
                .await;
            return Ok(());
        }

        let mut text = String::from("📄 *Your Recent Requests:*\n\n");
        for request in &requests {
            text.push_str(&format!(
                "{}\n   Status: {}\n",
                request_heading(request),
                request.status.label()
            ));
            if !request.address.is_empty() {
                text.push_str(&format!("   📍 {}\n", request.address));
            }
            text.push_str(&format!("   📅 {}\n\n", format_date(request.created_at)));
        }
        text.push_str("Type \"menu\" to book a new service.");
        outbox.send_text(phone, text).await;
        Ok(())
    }

    async fn recent_request(
        &self,
        customer_id: Uuid,
        statuses: &[RequestStatus],
    ) -> Result<Option<ServiceRequest>, FlowError> {
        let requests = self
            .market
            .store
            .list_requests_for_customer(customer_id, RECENT_REQUEST_LIMIT)
            .await?;
        Ok(requests
            .into_iter()
            .find(|request| statuses.contains(&request.status)))
    }
}
