//! Intake session state machine.
//!
//! Decides, from the user's current [`SessionState`] and one inbound message,
//! whether the message is a command, an intake answer, or a consultation
//! question, and what should happen next. The machine is pure: it mutates the
//! profile's intake fields and returns a [`Step`] describing replies and
//! side effects; the engine performs the effects (composer calls, CRM lead
//! delivery) and persists the profile.
//!
//! # States
//!
//! | State | Meaning |
//! |-------|---------|
//! | `Idle` | No intake in progress. Free text is answered by the composer. |
//! | `ServiceSelected` | Transient: a service was chosen, contact prompt follows at once. |
//! | `AwaitingContact` | Next text message is parsed as name + phone. |
//! | `Active` | Contact captured, lead submitted; free text is answered by the composer. |
//!
//! `/cancel` from any non-`Idle` state returns to `Idle`, clearing the
//! selected service and intake retry counter. Conversation memory and the
//! recorded name and phone are kept.

use chrono::{DateTime, Utc};

use crate::catalog::ServiceCatalog;
use crate::contact::parse_contact;
use crate::memory::last_exchange;
use crate::models::{ContactInfo, SessionState, UserProfile};

// ============ Inbound ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Services,
    Cancel,
    Call,
}

/// A button press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    SelectService(String),
    Consult,
    ContactManager,
    BackToServices,
    /// Star rating for the last answer; `None` is "skip".
    Rate(Option<u8>),
}

impl Action {
    /// Parse a button callback token.
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "consultation" => Some(Action::Consult),
            "contact_manager" => Some(Action::ContactManager),
            "back_to_services" => Some(Action::BackToServices),
            "rate:skip" => Some(Action::Rate(None)),
            _ => {
                if let Some(score) = token.strip_prefix("rate:") {
                    return match score.parse::<u8>() {
                        Ok(n @ 1..=5) => Some(Action::Rate(Some(n))),
                        _ => None,
                    };
                }
                token
                    .strip_prefix("service:")
                    .filter(|code| !code.is_empty())
                    .map(|code| Action::SelectService(code.to_string()))
            }
        }
    }

    pub fn token(&self) -> String {
        match self {
            Action::SelectService(code) => format!("service:{}", code),
            Action::Consult => "consultation".to_string(),
            Action::ContactManager => "contact_manager".to_string(),
            Action::BackToServices => "back_to_services".to_string(),
            Action::Rate(Some(n)) => format!("rate:{}", n),
            Action::Rate(None) => "rate:skip".to_string(),
        }
    }
}

/// One inbound user event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Command(Command),
    Action(Action),
    Text(String),
}

impl Inbound {
    /// Classify a text message. `/cmd@botname` forms are accepted; unknown
    /// slash commands are treated as plain text.
    pub fn from_text(text: &str) -> Self {
        let trimmed = text.trim();
        if let Some(rest) = trimmed.strip_prefix('/') {
            let word = rest.split_whitespace().next().unwrap_or("");
            let name = word.split('@').next().unwrap_or("");
            let command = match name {
                "start" => Some(Command::Start),
                "help" => Some(Command::Help),
                "services" => Some(Command::Services),
                "cancel" => Some(Command::Cancel),
                "call" => Some(Command::Call),
                _ => None,
            };
            if let Some(command) = command {
                return Inbound::Command(command);
            }
        }
        Inbound::Text(trimmed.to_string())
    }

    /// Text written to the audit log for this event.
    pub fn audit_text(&self) -> String {
        match self {
            Inbound::Command(c) => format!("/{}", format!("{:?}", c).to_lowercase()),
            Inbound::Action(a) => format!("[button] {}", a.token()),
            Inbound::Text(t) => t.clone(),
        }
    }
}

// ============ Outbound ============

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    /// Callback token, parsed back with [`Action::parse`].
    pub action: String,
}

impl Button {
    fn new(label: &str, action: Action) -> Self {
        Self {
            label: label.to_string(),
            action: action.token(),
        }
    }
}

/// A reply to the user: text plus optional inline keyboard rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub text: String,
    pub buttons: Vec<Vec<Button>>,
}

impl Outbound {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            buttons: Vec::new(),
        }
    }

    pub fn with_buttons(mut self, buttons: Vec<Vec<Button>>) -> Self {
        self.buttons = buttons;
        self
    }
}

/// One row of 1-5 stars and a skip row, attached under composed answers.
pub fn rating_buttons() -> Vec<Vec<Button>> {
    let stars = (1..=5u8)
        .map(|n| Button::new(&"\u{2b50}".repeat(n as usize), Action::Rate(Some(n))))
        .collect();
    vec![stars, vec![Button::new("Skip", Action::Rate(None))]]
}

/// Work the engine performs after a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Reply(Outbound),
    /// Route the text through the answer composer and reply with its answer.
    Consult(String),
    /// Exactly one per `AwaitingContact -> Active` transition.
    SubmitLead {
        service_code: String,
        contact: ContactInfo,
    },
    /// Store a rating for the exchange that ended at `answered_at`.
    RecordRating {
        score: u8,
        question: String,
        answer: String,
        answered_at: DateTime<Utc>,
    },
}

/// Outcome of a failed contact parse, exposed to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactParse {
    Retry { attempt: u32 },
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Step {
    pub effects: Vec<Effect>,
    pub transitions: Vec<Transition>,
    pub contact_parse: Option<ContactParse>,
}

impl Step {
    fn reply(out: Outbound) -> Self {
        Self {
            effects: vec![Effect::Reply(out)],
            ..Default::default()
        }
    }

    pub fn submits_lead(&self) -> bool {
        self.effects
            .iter()
            .any(|e| matches!(e, Effect::SubmitLead { .. }))
    }
}

// ============ Messages ============

const WELCOME: &str = "Welcome! We advise on investments, wealth structuring and relocation. \
Choose a service below, or ask me a question at any time.";
const HELP: &str = "Commands:\n/start - main menu\n/services - list of services\n\
/call - request a call from a manager\n/cancel - cancel the current request\n\n\
You can also just type a question and I will answer it.";
const CONTACT_PROMPT: &str =
    "Please send your first name, last name and phone number in one message, \
for example: Ivan Petrov +41791234567";
const CONTACT_RETRY: &str = "I could not recognize a name and phone number. \
Please send them in one line, for example: Ivan Petrov +41791234567";
const CONTACT_GIVE_UP: &str = "I still could not recognize your contact details. \
You can try again from the menu or use /call later.";
const LEAD_ACCEPTED: &str = "Thank you! Your request has been received and a manager \
will contact you shortly. Meanwhile, feel free to ask any questions.";
const CONSULT_PROMPT: &str = "Ask your question and I will answer based on our materials.";
const FINISH_INTAKE_FIRST: &str =
    "Please send your name and phone number first, or /cancel to stop.";
const CANCELLED: &str = "Request cancelled. You can choose a service again at any time.";
const NOTHING_TO_CANCEL: &str = "There is nothing to cancel.";
const UNKNOWN_SERVICE: &str = "Sorry, this service is not available. Please choose one from the menu.";
const CHOOSE_SERVICE: &str = "Choose a service so a manager can contact you:";
const RATED_HIGH: &str = "Thank you for the high rating! Happy to help further.";
const RATED_MEDIUM: &str = "Thank you for the rating! We will keep improving.";
const RATED_LOW: &str = "Thank you for the honest feedback. A manager can help in more detail: use /call.";
const RATING_SKIPPED: &str = "Thanks! Let's continue.";
const NOTHING_TO_RATE: &str = "There is no answer to rate yet. Ask me a question first.";

// ============ Machine ============

pub struct SessionMachine {
    catalog: ServiceCatalog,
    max_contact_attempts: u32,
}

impl SessionMachine {
    pub fn new(catalog: ServiceCatalog, max_contact_attempts: u32) -> Self {
        Self {
            catalog,
            max_contact_attempts: max_contact_attempts.max(1),
        }
    }

    pub fn catalog(&self) -> &ServiceCatalog {
        &self.catalog
    }

    /// Advance the session for one inbound event.
    pub fn step(&self, profile: &mut UserProfile, inbound: &Inbound) -> Step {
        match inbound {
            Inbound::Command(cmd) => self.on_command(profile, *cmd),
            Inbound::Action(action) => self.on_action(profile, action),
            Inbound::Text(text) => self.on_text(profile, text),
        }
    }

    fn on_command(&self, profile: &mut UserProfile, cmd: Command) -> Step {
        match cmd {
            Command::Start => {
                let mut step = Step::reply(self.menu(WELCOME));
                if profile.state == SessionState::AwaitingContact {
                    self.reset_intake(profile, &mut step);
                }
                step
            }
            Command::Help => Step::reply(Outbound::text(HELP)),
            Command::Services => Step::reply(self.menu(CHOOSE_SERVICE)),
            Command::Cancel => {
                if profile.state == SessionState::Idle {
                    return Step::reply(Outbound::text(NOTHING_TO_CANCEL));
                }
                let mut step = Step::reply(Outbound::text(CANCELLED));
                self.reset_intake(profile, &mut step);
                step
            }
            Command::Call => self.request_call(profile),
        }
    }

    fn on_action(&self, profile: &mut UserProfile, action: &Action) -> Step {
        match action {
            Action::SelectService(code) => self.select_service(profile, code),
            Action::Consult => {
                if profile.state == SessionState::AwaitingContact {
                    Step::reply(Outbound::text(FINISH_INTAKE_FIRST))
                } else {
                    Step::reply(Outbound::text(CONSULT_PROMPT))
                }
            }
            Action::ContactManager => self.request_call(profile),
            Action::BackToServices => Step::reply(self.menu(CHOOSE_SERVICE)),
            Action::Rate(None) => Step::reply(Outbound::text(RATING_SKIPPED)),
            Action::Rate(Some(score)) => self.rate(profile, *score),
        }
    }

    fn rate(&self, profile: &UserProfile, score: u8) -> Step {
        let Some((question, answer)) = last_exchange(&profile.history) else {
            return Step::reply(Outbound::text(NOTHING_TO_RATE));
        };
        let thanks = if score >= 4 {
            RATED_HIGH
        } else if score == 3 {
            RATED_MEDIUM
        } else {
            RATED_LOW
        };
        Step {
            effects: vec![
                Effect::RecordRating {
                    score,
                    question: question.text.clone(),
                    answer: answer.text.clone(),
                    answered_at: answer.timestamp,
                },
                Effect::Reply(Outbound::text(thanks)),
            ],
            ..Default::default()
        }
    }

    fn on_text(&self, profile: &mut UserProfile, text: &str) -> Step {
        match profile.state {
            SessionState::AwaitingContact => self.intake(profile, text),
            SessionState::Idle | SessionState::Active | SessionState::ServiceSelected => Step {
                effects: vec![Effect::Consult(text.to_string())],
                ..Default::default()
            },
        }
    }

    fn select_service(&self, profile: &mut UserProfile, code: &str) -> Step {
        let Some(service) = self.catalog.get(code) else {
            return Step::reply(self.menu(UNKNOWN_SERVICE));
        };

        let mut step = Step::default();
        let from = profile.state;
        profile.service_code = Some(service.code.clone());
        profile.contact_attempts = 0;
        step.transitions.push(Transition {
            from,
            to: SessionState::ServiceSelected,
        });
        step.transitions.push(Transition {
            from: SessionState::ServiceSelected,
            to: SessionState::AwaitingContact,
        });
        profile.state = SessionState::AwaitingContact;

        step.effects.push(Effect::Reply(Outbound::text(format!(
            "You selected: {}.\n\n{}",
            service.title, CONTACT_PROMPT
        ))));
        step
    }

    fn intake(&self, profile: &mut UserProfile, text: &str) -> Step {
        match parse_contact(text) {
            Ok(contact) => {
                let service_code = profile.service_code.clone().unwrap_or_default();
                profile.full_name = Some(contact.full_name.clone());
                profile.phone = Some(contact.phone.clone());
                profile.contact_attempts = 0;
                profile.intake_count += 1;
                profile.state = SessionState::Active;
                Step {
                    effects: vec![
                        Effect::Reply(Outbound::text(LEAD_ACCEPTED)),
                        Effect::SubmitLead {
                            service_code,
                            contact,
                        },
                    ],
                    transitions: vec![Transition {
                        from: SessionState::AwaitingContact,
                        to: SessionState::Active,
                    }],
                    contact_parse: None,
                }
            }
            Err(err) => {
                profile.contact_attempts += 1;
                tracing::debug!(
                    user_id = profile.user_id,
                    attempt = profile.contact_attempts,
                    error = %err,
                    "contact parse failed"
                );
                if profile.contact_attempts >= self.max_contact_attempts {
                    let mut step = Step::reply(self.menu(CONTACT_GIVE_UP));
                    self.reset_intake(profile, &mut step);
                    step.contact_parse = Some(ContactParse::GiveUp);
                    step
                } else {
                    let mut step = Step::reply(Outbound::text(CONTACT_RETRY));
                    step.contact_parse = Some(ContactParse::Retry {
                        attempt: profile.contact_attempts,
                    });
                    step
                }
            }
        }
    }

    /// `/call` and the "contact a manager" button: re-enter intake for the
    /// recorded service, or show the menu when none is recorded.
    fn request_call(&self, profile: &mut UserProfile) -> Step {
        if profile.state == SessionState::AwaitingContact {
            return Step::reply(Outbound::text(CONTACT_PROMPT));
        }
        match profile.service_code.clone() {
            Some(code) if self.catalog.get(&code).is_some() => self.select_service(profile, &code),
            _ => Step::reply(self.menu(CHOOSE_SERVICE)),
        }
    }

    fn reset_intake(&self, profile: &mut UserProfile, step: &mut Step) {
        let from = profile.state;
        profile.state = SessionState::Idle;
        profile.service_code = None;
        profile.contact_attempts = 0;
        if from != SessionState::Idle {
            step.transitions.push(Transition {
                from,
                to: SessionState::Idle,
            });
        }
    }

    /// Service menu: two services per row, then consult and manager buttons.
    pub fn menu(&self, text: &str) -> Outbound {
        let mut rows: Vec<Vec<Button>> = self
            .catalog
            .services()
            .chunks(2)
            .map(|pair| {
                pair.iter()
                    .map(|s| Button::new(&s.title, Action::SelectService(s.code.clone())))
                    .collect()
            })
            .collect();
        rows.push(vec![Button::new("Consult online", Action::Consult)]);
        rows.push(vec![Button::new("Contact a manager", Action::ContactManager)]);
        Outbound {
            text: text.to_string(),
            buttons: rows,
        }
    }
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new(ServiceCatalog::default(), 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn profile() -> UserProfile {
        UserProfile::new(42, Utc::now())
    }

    fn select(code: &str) -> Inbound {
        Inbound::Action(Action::SelectService(code.to_string()))
    }

    #[test]
    fn test_parse_inbound_text() {
        assert_eq!(Inbound::from_text("/start"), Inbound::Command(Command::Start));
        assert_eq!(
            Inbound::from_text("/cancel@consult_bot"),
            Inbound::Command(Command::Cancel)
        );
        assert_eq!(
            Inbound::from_text("/unknown"),
            Inbound::Text("/unknown".to_string())
        );
        assert_eq!(
            Action::parse("service:crypto"),
            Some(Action::SelectService("crypto".into()))
        );
        assert_eq!(Action::parse("service:"), None);
        assert_eq!(Action::parse("garbage"), None);
        assert_eq!(Action::parse("rate:4"), Some(Action::Rate(Some(4))));
        assert_eq!(Action::parse("rate:skip"), Some(Action::Rate(None)));
        assert_eq!(Action::parse("rate:0"), None);
        assert_eq!(Action::parse("rate:6"), None);
        assert_eq!(Action::parse("rate:"), None);
    }

    #[test]
    fn test_only_service_selection_leaves_idle() {
        let machine = SessionMachine::default();
        let inputs = vec![
            Inbound::Command(Command::Start),
            Inbound::Command(Command::Help),
            Inbound::Command(Command::Services),
            Inbound::Command(Command::Cancel),
            Inbound::Command(Command::Call),
            Inbound::Action(Action::Consult),
            Inbound::Action(Action::ContactManager),
            Inbound::Action(Action::BackToServices),
            Inbound::Action(Action::Rate(Some(5))),
            Inbound::Action(Action::Rate(None)),
            Inbound::Text("Ivan Petrov +41791234567".into()),
            select("no_such_service"),
        ];
        for input in inputs {
            let mut p = profile();
            let step = machine.step(&mut p, &input);
            assert_eq!(p.state, SessionState::Idle, "input {:?}", input);
            assert!(step.transitions.is_empty());
            assert!(!step.submits_lead());
        }

        let mut p = profile();
        let step = machine.step(&mut p, &select("venture_capital"));
        assert_eq!(p.state, SessionState::AwaitingContact);
        assert_eq!(p.service_code.as_deref(), Some("venture_capital"));
        assert_eq!(
            step.transitions,
            vec![
                Transition {
                    from: SessionState::Idle,
                    to: SessionState::ServiceSelected
                },
                Transition {
                    from: SessionState::ServiceSelected,
                    to: SessionState::AwaitingContact
                },
            ]
        );
    }

    #[test]
    fn test_idle_text_is_a_question() {
        let machine = SessionMachine::default();
        let mut p = profile();
        let step = machine.step(&mut p, &Inbound::Text("What do you offer?".into()));
        assert_eq!(
            step.effects,
            vec![Effect::Consult("What do you offer?".into())]
        );
    }

    #[test]
    fn test_valid_contact_activates_with_one_lead() {
        let machine = SessionMachine::default();
        let mut p = profile();
        machine.step(&mut p, &select("venture_capital"));
        let step = machine.step(&mut p, &Inbound::Text("Ivan Petrov +41791234567".into()));
        assert_eq!(p.state, SessionState::Active);
        assert_eq!(p.full_name.as_deref(), Some("Ivan Petrov"));
        assert_eq!(p.phone.as_deref(), Some("+41791234567"));
        let leads = step
            .effects
            .iter()
            .filter(|e| matches!(e, Effect::SubmitLead { .. }))
            .count();
        assert_eq!(leads, 1);
        assert_eq!(p.intake_count, 1);

        machine.step(&mut p, &select("crypto"));
        machine.step(&mut p, &Inbound::Text("Ivan Petrov +41791234567".into()));
        assert_eq!(p.intake_count, 2);
    }

    #[test]
    fn test_bad_contact_retries_then_gives_up() {
        let machine = SessionMachine::new(ServiceCatalog::default(), 3);
        let mut p = profile();
        machine.step(&mut p, &select("crypto"));

        let step = machine.step(&mut p, &Inbound::Text("hello".into()));
        assert_eq!(p.state, SessionState::AwaitingContact);
        assert_eq!(step.contact_parse, Some(ContactParse::Retry { attempt: 1 }));
        assert!(!step.submits_lead());

        machine.step(&mut p, &Inbound::Text("hello again".into()));
        let step = machine.step(&mut p, &Inbound::Text("still no".into()));
        assert_eq!(step.contact_parse, Some(ContactParse::GiveUp));
        assert_eq!(p.state, SessionState::Idle);
        assert_eq!(p.service_code, None);
    }

    #[test]
    fn test_active_messages_are_questions() {
        let machine = SessionMachine::default();
        let mut p = profile();
        machine.step(&mut p, &select("crypto"));
        machine.step(&mut p, &Inbound::Text("Ivan Petrov +41791234567".into()));
        let step = machine.step(&mut p, &Inbound::Text("Ivan Petrov +41791234567".into()));
        assert_eq!(p.state, SessionState::Active);
        assert!(!step.submits_lead());
        assert!(matches!(step.effects[0], Effect::Consult(_)));
    }

    #[test]
    fn test_cancel_keeps_memory_and_contact() {
        let machine = SessionMachine::default();
        let mut p = profile();
        p.history.push(crate::models::ConversationTurn {
            role: crate::models::Role::User,
            text: "earlier".into(),
            timestamp: Utc::now(),
        });
        p.full_name = Some("Ivan Petrov".into());
        machine.step(&mut p, &select("real_estate"));
        machine.step(&mut p, &Inbound::Text("nope".into()));
        let step = machine.step(&mut p, &Inbound::Command(Command::Cancel));
        assert_eq!(p.state, SessionState::Idle);
        assert_eq!(p.service_code, None);
        assert_eq!(p.contact_attempts, 0);
        assert_eq!(p.history.len(), 1);
        assert_eq!(p.full_name.as_deref(), Some("Ivan Petrov"));
        assert_eq!(
            step.transitions,
            vec![Transition {
                from: SessionState::AwaitingContact,
                to: SessionState::Idle
            }]
        );
    }

    #[test]
    fn test_restart_from_active_reenters_intake() {
        let machine = SessionMachine::default();
        let mut p = profile();
        machine.step(&mut p, &select("crypto"));
        machine.step(&mut p, &Inbound::Text("Ivan Petrov +41791234567".into()));
        let step = machine.step(&mut p, &select("relocation"));
        assert_eq!(p.state, SessionState::AwaitingContact);
        assert_eq!(step.transitions[0].from, SessionState::Active);
        assert_eq!(step.transitions[0].to, SessionState::ServiceSelected);
    }

    #[test]
    fn test_call_uses_recorded_service() {
        let machine = SessionMachine::default();
        let mut p = profile();
        machine.step(&mut p, &Inbound::Command(Command::Call));
        assert_eq!(p.state, SessionState::Idle);

        p.service_code = Some("hnwi".into());
        p.state = SessionState::Active;
        machine.step(&mut p, &Inbound::Command(Command::Call));
        assert_eq!(p.state, SessionState::AwaitingContact);
    }

    #[test]
    fn test_menu_layout() {
        let machine = SessionMachine::default();
        let menu = machine.menu("pick");
        assert_eq!(menu.buttons.len(), 6);
        assert!(menu.buttons[..4].iter().all(|row| row.len() == 2));
        assert_eq!(menu.buttons[0][0].action, "service:venture_capital");
        assert_eq!(menu.buttons[4][0].action, "consultation");
        assert_eq!(menu.buttons[5][0].action, "contact_manager");
    }

    #[test]
    fn test_rating_targets_last_answer() {
        use crate::models::{ConversationTurn, Role};

        let machine = SessionMachine::default();
        let mut p = profile();
        let step = machine.step(&mut p, &Inbound::Action(Action::Rate(Some(5))));
        assert_eq!(step.effects, vec![Effect::Reply(Outbound::text(NOTHING_TO_RATE))]);

        let answered_at = Utc::now();
        for (role, text) in [(Role::User, "Is custody covered?"), (Role::Assistant, "Yes.")] {
            p.history.push(ConversationTurn {
                role,
                text: text.into(),
                timestamp: answered_at,
            });
        }

        let step = machine.step(&mut p, &Inbound::Action(Action::Rate(Some(2))));
        assert_eq!(
            step.effects[0],
            Effect::RecordRating {
                score: 2,
                question: "Is custody covered?".into(),
                answer: "Yes.".into(),
                answered_at,
            }
        );
        assert_eq!(step.effects[1], Effect::Reply(Outbound::text(RATED_LOW)));
        assert!(step.transitions.is_empty());

        let step = machine.step(&mut p, &Inbound::Action(Action::Rate(Some(4))));
        assert_eq!(step.effects[1], Effect::Reply(Outbound::text(RATED_HIGH)));

        let step = machine.step(&mut p, &Inbound::Action(Action::Rate(None)));
        assert_eq!(step.effects, vec![Effect::Reply(Outbound::text(RATING_SKIPPED))]);
    }

    #[test]
    fn test_rating_keyboard_round_trips() {
        let rows = rating_buttons();
        assert_eq!(rows[0].len(), 5);
        for (i, button) in rows[0].iter().enumerate() {
            assert_eq!(
                Action::parse(&button.action),
                Some(Action::Rate(Some(i as u8 + 1)))
            );
        }
        assert_eq!(rows[1][0].action, "rate:skip");
    }
}
