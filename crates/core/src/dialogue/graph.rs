//! The questionnaire as data: one [`Node`] per [`DialogueState`] plus the
//! `intent -> sub-sequence` table in [`BRANCHES`].
//!
//! [`evaluate`] is pure. It decides what an input means in the session's
//! current state and leaves persistence, collaborators and prompts to the
//! engine.

use thiserror::Error;

use crate::dialogue::session::Session;
use crate::dialogue::states::{DialogueState, Field, Input, Intent};
use crate::validators::{fold, FieldKind, ValidationError, FUEL, LEAD_SOURCE};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptionAction {
    SelectIntent(Intent),
    Returning(bool),
    /// Write the literal value into the node's field and follow the node's successor.
    Record(&'static str),
    Goto(DialogueState),
    Confirm,
    Edit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OptionSpec {
    pub id: &'static str,
    pub label: &'static str,
    pub aliases: &'static [&'static str],
    pub action: OptionAction,
}

impl OptionSpec {
    fn matches(&self, input: &Input) -> bool {
        match input {
            Input::Option(id) => id.trim() == self.id || fold(id) == fold(self.id),
            Input::Text(text) => {
                let folded = fold(text);
                !folded.is_empty()
                    && (folded == fold(self.id)
                        || folded == fold(self.label)
                        || self.aliases.iter().any(|alias| fold(alias) == folded))
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expect {
    Text(FieldKind),
    Options(&'static [OptionSpec]),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Next {
    Goto(DialogueState),
    /// Returning contacts jump to their branch; new contacts continue to the given state.
    ReturningFork(DialogueState),
    EnterBranch,
    FollowBranch,
    /// Successor is decided by the selected option.
    ByOption,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Node {
    pub state: DialogueState,
    pub prompt: &'static str,
    pub expect: Expect,
    pub field: Option<Field>,
    pub next: Next,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Audience {
    All,
    NewOnly,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BranchStep {
    pub state: DialogueState,
    pub audience: Audience,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Branch {
    pub intent: Intent,
    pub steps: &'static [BranchStep],
}

const fn step(state: DialogueState) -> BranchStep {
    BranchStep { state, audience: Audience::All }
}

const fn new_only(state: DialogueState) -> BranchStep {
    BranchStep { state, audience: Audience::NewOnly }
}

pub static BRANCHES: &[Branch] = &[
    Branch {
        intent: Intent::Service,
        steps: &[step(DialogueState::ServiceDescription), new_only(DialogueState::LeadSource)],
    },
    Branch {
        intent: Intent::Part,
        steps: &[step(DialogueState::PartDescription), new_only(DialogueState::LeadSource)],
    },
    Branch {
        intent: Intent::PostSale,
        steps: &[
            step(DialogueState::PurchaseDate),
            step(DialogueState::PostSaleComplaint),
            step(DialogueState::Feedback),
        ],
    },
    Branch {
        intent: Intent::ReturnVisit,
        steps: &[
            step(DialogueState::ServiceDate),
            step(DialogueState::WorkOrder),
            step(DialogueState::ReturnComplaint),
            step(DialogueState::Feedback),
        ],
    },
];

/// Identity, vehicle and address questions asked of new contacts, in order.
pub const SHARED_PREFIX: &[DialogueState] = &[
    DialogueState::Name,
    DialogueState::Cpf,
    DialogueState::BirthDate,
    DialogueState::VehicleType,
    DialogueState::MakeModel,
    DialogueState::ModelYear,
    DialogueState::Mileage,
    DialogueState::Fuel,
    DialogueState::Plate,
    DialogueState::PostalCode,
    DialogueState::AddressNumber,
    DialogueState::ComplementChoice,
];

pub const MAIN_MENU: &[OptionSpec] = &[
    OptionSpec {
        id: "op_servicos",
        label: "Serviços",
        aliases: &["1", "servico"],
        action: OptionAction::SelectIntent(Intent::Service),
    },
    OptionSpec {
        id: "op_pecas",
        label: "Peças",
        aliases: &["2", "peca"],
        action: OptionAction::SelectIntent(Intent::Part),
    },
    OptionSpec {
        id: "op_pos_venda",
        label: "Pós-venda / Garantia",
        aliases: &["3", "pos-venda", "pos venda", "garantia"],
        action: OptionAction::SelectIntent(Intent::PostSale),
    },
    OptionSpec {
        id: "op_retorno",
        label: "Retorno Oficina",
        aliases: &["4", "retorno"],
        action: OptionAction::SelectIntent(Intent::ReturnVisit),
    },
    OptionSpec {
        id: "op_endereco",
        label: "Endereço e Contato",
        aliases: &["5", "endereco", "contato"],
        action: OptionAction::SelectIntent(Intent::AddressInfo),
    },
];

const RETURNING_OPTIONS: &[OptionSpec] = &[
    OptionSpec {
        id: "cad_sim",
        label: "Sim",
        aliases: &["s"],
        action: OptionAction::Returning(true),
    },
    OptionSpec {
        id: "cad_nao",
        label: "Não",
        aliases: &["n"],
        action: OptionAction::Returning(false),
    },
];

const VEHICLE_TYPE_OPTIONS: &[OptionSpec] = &[
    OptionSpec {
        id: "tv_passeio",
        label: "Passeio",
        aliases: &["1", "carro"],
        action: OptionAction::Record("Passeio"),
    },
    OptionSpec {
        id: "tv_utilitario",
        label: "Utilitário",
        aliases: &["2", "van"],
        action: OptionAction::Record("Utilitário"),
    },
];

const COMPLEMENT_OPTIONS: &[OptionSpec] = &[
    OptionSpec {
        id: "comp_sim",
        label: "Sim",
        aliases: &["s"],
        action: OptionAction::Goto(DialogueState::ComplementText),
    },
    OptionSpec { id: "comp_nao", label: "Não", aliases: &["n"], action: OptionAction::Record("") },
];

pub const CONFIRMATION_OPTIONS: &[OptionSpec] = &[
    OptionSpec {
        id: "confirmar",
        label: "Confirmar",
        aliases: &["confirm", "ok", "sim"],
        action: OptionAction::Confirm,
    },
    OptionSpec {
        id: "editar",
        label: "Editar",
        aliases: &["corrigir", "alterar"],
        action: OptionAction::Edit,
    },
];

const fn text(
    state: DialogueState,
    prompt: &'static str,
    kind: FieldKind,
    field: Field,
    next: Next,
) -> Node {
    Node { state, prompt, expect: Expect::Text(kind), field: Some(field), next }
}

static NODES: &[Node] = &[
    Node {
        state: DialogueState::Welcome,
        prompt: "Vamos iniciar seu atendimento.\n\n*Escolha uma opção:*",
        expect: Expect::Options(MAIN_MENU),
        field: Some(Field::Intent),
        next: Next::ByOption,
    },
    Node {
        state: DialogueState::ReturningContact,
        prompt: "Você já fez atendimento conosco antes?",
        expect: Expect::Options(RETURNING_OPTIONS),
        field: None,
        next: Next::ByOption,
    },
    text(
        DialogueState::Name,
        "Digite seu nome completo:",
        FieldKind::FreeText,
        Field::Name,
        Next::Goto(DialogueState::Cpf),
    ),
    text(
        DialogueState::Cpf,
        "Digite seu *CPF* (ex: 123.456.789-00):",
        FieldKind::Cpf,
        Field::Cpf,
        Next::ReturningFork(DialogueState::BirthDate),
    ),
    text(
        DialogueState::BirthDate,
        "Digite sua *data de nascimento*:",
        FieldKind::FreeText,
        Field::BirthDate,
        Next::Goto(DialogueState::VehicleType),
    ),
    Node {
        state: DialogueState::VehicleType,
        prompt: "Qual o tipo de veículo?",
        expect: Expect::Options(VEHICLE_TYPE_OPTIONS),
        field: Some(Field::VehicleType),
        next: Next::Goto(DialogueState::MakeModel),
    },
    text(
        DialogueState::MakeModel,
        "Digite *marca/modelo*:",
        FieldKind::FreeText,
        Field::MakeModel,
        Next::Goto(DialogueState::ModelYear),
    ),
    text(
        DialogueState::ModelYear,
        "Digite o *ano fab/mod*:",
        FieldKind::FreeText,
        Field::ModelYear,
        Next::Goto(DialogueState::Mileage),
    ),
    text(
        DialogueState::Mileage,
        "Digite o KM atual:",
        FieldKind::FreeText,
        Field::Mileage,
        Next::Goto(DialogueState::Fuel),
    ),
    text(
        DialogueState::Fuel,
        "Qual o combustível? (Gasolina, Etanol, Diesel, Flex ou GNV)",
        FieldKind::Choice(&FUEL),
        Field::Fuel,
        Next::Goto(DialogueState::Plate),
    ),
    text(
        DialogueState::Plate,
        "Digite a *placa*:",
        FieldKind::FreeText,
        Field::Plate,
        Next::Goto(DialogueState::PostalCode),
    ),
    text(
        DialogueState::PostalCode,
        "Digite o *CEP* (00000-000):",
        FieldKind::PostalCode,
        Field::PostalCode,
        Next::Goto(DialogueState::AddressNumber),
    ),
    text(
        DialogueState::AddressNumber,
        "Digite o *número*:",
        FieldKind::FreeText,
        Field::AddressNumber,
        Next::Goto(DialogueState::ComplementChoice),
    ),
    Node {
        state: DialogueState::ComplementChoice,
        prompt: "Deseja informar complemento?",
        expect: Expect::Options(COMPLEMENT_OPTIONS),
        field: Some(Field::Complement),
        next: Next::EnterBranch,
    },
    text(
        DialogueState::ComplementText,
        "Digite o complemento:",
        FieldKind::FreeText,
        Field::Complement,
        Next::EnterBranch,
    ),
    text(
        DialogueState::ServiceDescription,
        "Descreva o serviço desejado:",
        FieldKind::FreeText,
        Field::Description,
        Next::FollowBranch,
    ),
    text(
        DialogueState::PartDescription,
        "Descreva qual peça você procura:",
        FieldKind::FreeText,
        Field::Description,
        Next::FollowBranch,
    ),
    text(
        DialogueState::LeadSource,
        "Como nos conheceu?\n1 – Instagram\n2 – Facebook\n3 – Google\n4 – Outros",
        FieldKind::Choice(&LEAD_SOURCE),
        Field::LeadSource,
        Next::FollowBranch,
    ),
    text(
        DialogueState::PurchaseDate,
        "Qual a data da compra / aquisição do veículo?",
        FieldKind::FreeText,
        Field::PurchaseDate,
        Next::FollowBranch,
    ),
    text(
        DialogueState::PostSaleComplaint,
        "Descreva o problema ocorrido:",
        FieldKind::FreeText,
        Field::Description,
        Next::FollowBranch,
    ),
    text(
        DialogueState::ServiceDate,
        "Qual foi a data do serviço realizado?",
        FieldKind::FreeText,
        Field::ServiceDate,
        Next::FollowBranch,
    ),
    text(
        DialogueState::WorkOrder,
        "Digite o número da OS:",
        FieldKind::FreeText,
        Field::WorkOrder,
        Next::FollowBranch,
    ),
    text(
        DialogueState::ReturnComplaint,
        "Descreva o problema encontrado após o serviço:",
        FieldKind::FreeText,
        Field::Description,
        Next::FollowBranch,
    ),
    text(
        DialogueState::Feedback,
        "Nos deixe uma sugestão:",
        FieldKind::FreeText,
        Field::Feedback,
        Next::FollowBranch,
    ),
    Node {
        state: DialogueState::Confirmation,
        prompt: "Confirma?",
        expect: Expect::Options(CONFIRMATION_OPTIONS),
        field: None,
        next: Next::ByOption,
    },
];

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("no questionnaire node declared for state {0:?}")]
    UnknownNode(DialogueState),
    #[error("state {state:?} needs a selected intent")]
    IntentMissing { state: DialogueState },
    #[error("intent {0:?} has no questionnaire branch")]
    NoBranch(Intent),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    Invalid(ValidationError),
    InvalidOption,
    /// A quick-reply id arrived while a typed answer was expected.
    UnexpectedOption,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Advance {
    pub writes: Vec<(Field, String)>,
    pub to: DialogueState,
    pub intent: Option<Intent>,
    pub returning: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Advanced(Advance),
    Rejected(Rejection),
    /// Free text in the menu that no option claims.
    Unmatched,
    Informational(Intent),
    Commit,
    Edit,
}

pub fn node(state: DialogueState) -> Result<&'static Node, GraphError> {
    NODES.iter().find(|node| node.state == state).ok_or(GraphError::UnknownNode(state))
}

pub fn branch(intent: Intent) -> Result<&'static Branch, GraphError> {
    BRANCHES.iter().find(|branch| branch.intent == intent).ok_or(GraphError::NoBranch(intent))
}

/// Branch states the given audience walks through, in order.
pub fn branch_states(intent: Intent, returning: bool) -> Result<Vec<DialogueState>, GraphError> {
    Ok(branch(intent)?
        .steps
        .iter()
        .filter(|step| !returning || step.audience == Audience::All)
        .map(|step| step.state)
        .collect())
}

pub fn evaluate(session: &Session, input: &Input) -> Result<Outcome, GraphError> {
    let node = node(session.state)?;

    match node.expect {
        Expect::Text(kind) => {
            let Input::Text(raw) = input else {
                return Ok(Outcome::Rejected(Rejection::UnexpectedOption));
            };
            let value = match kind.validate(raw) {
                Ok(value) => value,
                Err(error) => return Ok(Outcome::Rejected(Rejection::Invalid(error))),
            };
            let to = resolve(node.next, session.state, session.intent, session.returning)?;
            Ok(Outcome::Advanced(Advance {
                writes: node.field.map(|field| vec![(field, value)]).unwrap_or_default(),
                to,
                intent: None,
                returning: None,
            }))
        }
        Expect::Options(options) => {
            let Some(option) = options.iter().find(|option| option.matches(input)) else {
                if session.state == DialogueState::Welcome && matches!(input, Input::Text(_)) {
                    return Ok(Outcome::Unmatched);
                }
                return Ok(Outcome::Rejected(Rejection::InvalidOption));
            };
            apply_option(node, option, session)
        }
    }
}

fn apply_option(
    node: &Node,
    option: &OptionSpec,
    session: &Session,
) -> Result<Outcome, GraphError> {
    let outcome = match option.action {
        OptionAction::SelectIntent(intent) if !intent.submits_record() => {
            Outcome::Informational(intent)
        }
        OptionAction::SelectIntent(intent) => Outcome::Advanced(Advance {
            writes: vec![
                (Field::Intent, intent.as_str().to_string()),
                (Field::RecordType, intent.record_type().to_string()),
            ],
            to: DialogueState::ReturningContact,
            intent: Some(intent),
            returning: None,
        }),
        OptionAction::Returning(returning) => Outcome::Advanced(Advance {
            writes: Vec::new(),
            to: if returning { DialogueState::Cpf } else { DialogueState::Name },
            intent: None,
            returning: Some(returning),
        }),
        OptionAction::Record(value) => Outcome::Advanced(Advance {
            writes: node.field.map(|field| vec![(field, value.to_string())]).unwrap_or_default(),
            to: resolve(node.next, session.state, session.intent, session.returning)?,
            intent: None,
            returning: None,
        }),
        OptionAction::Goto(to) => {
            Outcome::Advanced(Advance { writes: Vec::new(), to, intent: None, returning: None })
        }
        OptionAction::Confirm => Outcome::Commit,
        OptionAction::Edit => Outcome::Edit,
    };
    Ok(outcome)
}

fn resolve(
    next: Next,
    current: DialogueState,
    intent: Option<Intent>,
    returning: bool,
) -> Result<DialogueState, GraphError> {
    match next {
        Next::Goto(state) => Ok(state),
        Next::ReturningFork(new_contact) if !returning => Ok(new_contact),
        Next::ReturningFork(_) | Next::EnterBranch => {
            let intent = intent.ok_or(GraphError::IntentMissing { state: current })?;
            Ok(branch_states(intent, returning)?
                .first()
                .copied()
                .unwrap_or(DialogueState::Confirmation))
        }
        Next::FollowBranch => {
            let intent = intent.ok_or(GraphError::IntentMissing { state: current })?;
            let states = branch_states(intent, returning)?;
            Ok(states
                .iter()
                .position(|state| *state == current)
                .and_then(|index| states.get(index + 1))
                .copied()
                .unwrap_or(DialogueState::Confirmation))
        }
        Next::ByOption => Err(GraphError::UnknownNode(current)),
    }
}

/// Fields that must be present before the confirmation state is entered.
pub fn required_fields(intent: Intent, returning: bool) -> Result<Vec<Field>, GraphError> {
    let mut fields = vec![Field::Phone, Field::Channel, Field::Intent, Field::RecordType];
    let prefix: &[DialogueState] = if returning { &[DialogueState::Cpf] } else { SHARED_PREFIX };

    for state in prefix.iter().copied().chain(branch_states(intent, returning)?) {
        if let Some(field) = node(state)?.field {
            if !fields.contains(&field) {
                fields.push(field);
            }
        }
    }
    Ok(fields)
}

pub fn missing_fields(session: &Session) -> Result<Vec<Field>, GraphError> {
    let intent = session.intent.ok_or(GraphError::IntentMissing { state: session.state })?;
    Ok(required_fields(intent, session.returning)?
        .into_iter()
        .filter(|field| !session.fields.contains_key(field))
        .collect())
}

/// Fields a returning-contact lookup may pre-fill.
pub fn prefill_fields() -> Vec<Field> {
    let mut fields: Vec<Field> = SHARED_PREFIX
        .iter()
        .filter_map(|state| node(*state).ok().and_then(|node| node.field))
        .filter(|field| *field != Field::Cpf)
        .collect();
    fields.push(Field::Address);
    fields.sort();
    fields
}

#[cfg(test)]
mod tests {
    use super::{
        branch_states, evaluate, missing_fields, node, prefill_fields, required_fields, Advance,
        Expect, Outcome, Rejection, BRANCHES,
    };
    use crate::dialogue::session::Session;
    use crate::dialogue::states::{DialogueState, Field, Input, Intent};
    use crate::validators::ValidationError;

    fn session_at(state: DialogueState, intent: Option<Intent>, returning: bool) -> Session {
        let mut session = Session::new("5511900000000", "Ana", "chatbot oficina");
        session.state = state;
        session.intent = intent;
        session.returning = returning;
        session
    }

    fn advanced(outcome: Outcome) -> Advance {
        match outcome {
            Outcome::Advanced(advance) => advance,
            other => panic!("expected advance, got {other:?}"),
        }
    }

    #[test]
    fn every_state_has_exactly_one_node() {
        for state in DialogueState::ALL {
            assert_eq!(node(state).expect("node").state, state);
        }
        assert_eq!(super::NODES.len(), DialogueState::ALL.len());
    }

    #[test]
    fn option_sets_stay_within_transport_limits() {
        for state in DialogueState::ALL {
            if let Expect::Options(options) = node(state).expect("node").expect {
                assert!(!options.is_empty() && options.len() <= 10, "{state:?}");
            }
        }
    }

    #[test]
    fn menu_accepts_option_ids_numbers_and_labels() {
        let session = session_at(DialogueState::Welcome, None, false);

        for input in [
            Input::Option("op_servicos".to_string()),
            Input::Text("1".to_string()),
            Input::Text("serviços".to_string()),
        ] {
            let advance = advanced(evaluate(&session, &input).expect("evaluate"));
            assert_eq!(advance.to, DialogueState::ReturningContact);
            assert_eq!(advance.intent, Some(Intent::Service));
            assert!(advance.writes.contains(&(Field::RecordType, "Serviço".to_string())));
        }
    }

    #[test]
    fn vehicle_type_accepts_typed_category_without_accents() {
        let session = session_at(DialogueState::VehicleType, Some(Intent::Service), false);

        for input in ["UTILITARIO", "van", "tv_utilitario"] {
            let advance =
                advanced(evaluate(&session, &Input::Text(input.to_string())).expect("evaluate"));
            assert_eq!(advance.to, DialogueState::MakeModel);
            assert!(advance.writes.contains(&(Field::VehicleType, "Utilitário".to_string())));
        }
    }

    #[test]
    fn address_option_is_informational() {
        let session = session_at(DialogueState::Welcome, None, false);
        assert_eq!(
            evaluate(&session, &Input::Text("5".to_string())).expect("evaluate"),
            Outcome::Informational(Intent::AddressInfo)
        );
    }

    #[test]
    fn unmatched_menu_text_is_left_to_fallback_but_unknown_ids_are_rejected() {
        let session = session_at(DialogueState::Welcome, None, false);
        assert_eq!(
            evaluate(&session, &Input::Text("qual o horário?".to_string())).expect("evaluate"),
            Outcome::Unmatched
        );
        assert_eq!(
            evaluate(&session, &Input::Option("op_desconhecida".to_string())).expect("evaluate"),
            Outcome::Rejected(Rejection::InvalidOption)
        );
    }

    #[test]
    fn unmatched_option_outside_menu_is_rejected() {
        let session =
            session_at(DialogueState::ComplementChoice, Some(Intent::Service), false);
        assert_eq!(
            evaluate(&session, &Input::Text("999".to_string())).expect("evaluate"),
            Outcome::Rejected(Rejection::InvalidOption)
        );
    }

    #[test]
    fn returning_fork_skips_identity_collection() {
        let yes = session_at(DialogueState::ReturningContact, Some(Intent::Part), false);
        let advance = advanced(evaluate(&yes, &Input::Text("Sim".to_string())).expect("evaluate"));
        assert_eq!(advance.to, DialogueState::Cpf);
        assert_eq!(advance.returning, Some(true));

        let advance =
            advanced(evaluate(&yes, &Input::Option("cad_nao".to_string())).expect("evaluate"));
        assert_eq!(advance.to, DialogueState::Name);
        assert_eq!(advance.returning, Some(false));

        let returning = session_at(DialogueState::Cpf, Some(Intent::Part), true);
        let advance = advanced(
            evaluate(&returning, &Input::Text("12345678900".to_string())).expect("evaluate"),
        );
        assert_eq!(advance.to, DialogueState::PartDescription);

        let fresh = session_at(DialogueState::Cpf, Some(Intent::Part), false);
        let advance =
            advanced(evaluate(&fresh, &Input::Text("12345678900".to_string())).expect("evaluate"));
        assert_eq!(advance.to, DialogueState::BirthDate);
    }

    #[test]
    fn invalid_cpf_is_rejected_with_reason() {
        let session = session_at(DialogueState::Cpf, Some(Intent::Service), false);
        assert!(matches!(
            evaluate(&session, &Input::Text("123".to_string())).expect("evaluate"),
            Outcome::Rejected(Rejection::Invalid(ValidationError::InvalidCpf { digits: 3 }))
        ));
    }

    #[test]
    fn typed_state_rejects_quick_reply_ids() {
        let session = session_at(DialogueState::Name, Some(Intent::Service), false);
        assert_eq!(
            evaluate(&session, &Input::Option("confirmar".to_string())).expect("evaluate"),
            Outcome::Rejected(Rejection::UnexpectedOption)
        );
    }

    #[test]
    fn lead_source_is_only_asked_of_new_contacts() {
        assert_eq!(
            branch_states(Intent::Service, false).expect("branch"),
            vec![DialogueState::ServiceDescription, DialogueState::LeadSource]
        );
        assert_eq!(
            branch_states(Intent::Service, true).expect("branch"),
            vec![DialogueState::ServiceDescription]
        );

        let returning = session_at(DialogueState::ServiceDescription, Some(Intent::Service), true);
        let advance = advanced(
            evaluate(&returning, &Input::Text("revisão".to_string())).expect("evaluate"),
        );
        assert_eq!(advance.to, DialogueState::Confirmation);
    }

    #[test]
    fn shared_feedback_step_converges_on_confirmation() {
        for intent in [Intent::PostSale, Intent::ReturnVisit] {
            let session = session_at(DialogueState::Feedback, Some(intent), false);
            let advance =
                advanced(evaluate(&session, &Input::Text("ótimo".to_string())).expect("evaluate"));
            assert_eq!(advance.to, DialogueState::Confirmation);
        }

        let session = session_at(DialogueState::WorkOrder, Some(Intent::ReturnVisit), false);
        let advance = advanced(evaluate(&session, &Input::Text("4512".to_string())).expect("evaluate"));
        assert_eq!(advance.to, DialogueState::ReturnComplaint);
        assert_eq!(advance.writes, vec![(Field::WorkOrder, "4512".to_string())]);
    }

    #[test]
    fn declining_complement_records_empty_value_and_enters_branch() {
        let session =
            session_at(DialogueState::ComplementChoice, Some(Intent::PostSale), false);
        let advance =
            advanced(evaluate(&session, &Input::Option("comp_nao".to_string())).expect("evaluate"));
        assert_eq!(advance.writes, vec![(Field::Complement, String::new())]);
        assert_eq!(advance.to, DialogueState::PurchaseDate);

        let advance =
            advanced(evaluate(&session, &Input::Option("comp_sim".to_string())).expect("evaluate"));
        assert!(advance.writes.is_empty());
        assert_eq!(advance.to, DialogueState::ComplementText);
    }

    #[test]
    fn confirmation_understands_aliases() {
        let session = session_at(DialogueState::Confirmation, Some(Intent::Service), false);
        for alias in ["confirmar", "OK", "Confirm"] {
            assert_eq!(
                evaluate(&session, &Input::Text(alias.to_string())).expect("evaluate"),
                Outcome::Commit
            );
        }
        for alias in ["editar", "Corrigir"] {
            assert_eq!(
                evaluate(&session, &Input::Text(alias.to_string())).expect("evaluate"),
                Outcome::Edit
            );
        }
    }

    #[test]
    fn required_fields_follow_intent_and_audience() {
        let returning = required_fields(Intent::ReturnVisit, true).expect("fields");
        assert!(returning.contains(&Field::Cpf));
        assert!(returning.contains(&Field::WorkOrder));
        assert!(!returning.contains(&Field::Name));

        let fresh = required_fields(Intent::Service, false).expect("fields");
        assert!(fresh.contains(&Field::Name));
        assert!(fresh.contains(&Field::Complement));
        assert!(fresh.contains(&Field::LeadSource));
        assert!(!fresh.contains(&Field::Feedback));
    }

    #[test]
    fn missing_fields_reports_unanswered_questions() {
        let mut session = session_at(DialogueState::Confirmation, Some(Intent::Part), true);
        session.fields.insert(Field::Intent, "part".to_string());
        session.fields.insert(Field::RecordType, "Peça".to_string());
        assert_eq!(
            missing_fields(&session).expect("missing"),
            vec![Field::Cpf, Field::Description]
        );
    }

    #[test]
    fn every_branch_step_points_at_a_typed_or_option_node() {
        for branch in BRANCHES {
            for step in branch.steps {
                assert!(node(step.state).expect("node").field.is_some());
            }
        }
        assert!(prefill_fields().contains(&Field::Address));
        assert!(!prefill_fields().contains(&Field::Cpf));
    }
}
