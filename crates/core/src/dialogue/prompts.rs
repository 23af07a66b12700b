use crate::dialogue::graph::OptionSpec;
use crate::dialogue::session::Session;
use crate::dialogue::states::{Field, Intent, ReplyOption};

pub const SESSION_EXPIRED: &str = "Sessão expirada. Vamos recomeçar!";
pub const INVALID_OPTION: &str = "Escolha uma opção válida.";
pub const TYPED_ANSWER_EXPECTED: &str = "Por favor, digite sua resposta.";
pub const MENU_REMINDER: &str = "Para continuar, *escolha uma opção:*";
pub const FALLBACK_UNAVAILABLE: &str =
    "Desculpe, não consegui entender agora. Envie *reiniciar* para recomeçar o atendimento.";
pub const EDIT_PREFIX: &str = "Vamos corrigir.";
pub const SUBMITTED: &str =
    "👍 *Perfeito!* Seus dados foram enviados.\nUm técnico entrará em contato em breve!";
pub const SUBMIT_RETRY: &str =
    "Não conseguimos registrar seu atendimento agora. Toque em *Confirmar* para tentar novamente.";
pub const MANUAL_FOLLOW_UP: &str =
    "Não foi possível registrar seu atendimento automaticamente. Nossa equipe vai entrar em contato com você pelo WhatsApp.";
pub const DIRECTORY_CLOSING: &str = "Se precisar de ajuda, estou aqui! 😊";

pub const DEFAULT_DIRECTORY: &str = "📍 *Endereços e Contatos*\n\n\
📍 *Micros e Vans*\nAv. São Miguel, 7900 – CEP 08070-001\n☎️ (11) 2030-5081\n\n\
📍 *Veículos*\nAv. São Miguel, 4049/4084 – CEP 03871-000\n☎️ (11) 2542-3332\n\n\
📍 *Oficina e Peças*\nAv. Amador Bueno da Veiga, 4222 – CEP 03652-000\n☎️ (11) 2542-3333";

pub fn greeting(display_name: &str) -> String {
    let name = display_name.trim();
    if name.is_empty() {
        "Olá! 👋".to_string()
    } else {
        format!("Olá {name}! 👋")
    }
}

pub fn confirmation_question(intent: Option<Intent>) -> &'static str {
    match intent {
        Some(Intent::Part) => "Confirma a peça?",
        _ => "Confirma?",
    }
}

pub fn reply_options(options: &[OptionSpec]) -> Vec<ReplyOption> {
    options.iter().map(|option| ReplyOption::new(option.id, option.label)).collect()
}

const SECTIONS: &[(Option<&str>, &[Field])] = &[
    (None, &[Field::Name, Field::Cpf, Field::BirthDate, Field::Phone]),
    (
        Some("🚗 *Veículo*"),
        &[
            Field::VehicleType,
            Field::MakeModel,
            Field::ModelYear,
            Field::Mileage,
            Field::Fuel,
            Field::Plate,
        ],
    ),
    (
        Some("📍 *Endereço*"),
        &[Field::PostalCode, Field::Address, Field::AddressNumber, Field::Complement],
    ),
    (
        Some("📝 *Atendimento*"),
        &[
            Field::RecordType,
            Field::Description,
            Field::LeadSource,
            Field::PurchaseDate,
            Field::ServiceDate,
            Field::WorkOrder,
            Field::Feedback,
        ],
    ),
];

/// Human-readable view of the pending record. Blank answers are omitted.
pub fn summary(session: &Session) -> String {
    let mut blocks = vec!["✅ *Resumo do seu atendimento:*".to_string()];

    for (heading, fields) in SECTIONS {
        let lines: Vec<String> = fields
            .iter()
            .filter_map(|field| {
                session
                    .field(*field)
                    .filter(|value| !value.trim().is_empty())
                    .map(|value| format!("*{}:* {value}", field.label()))
            })
            .collect();
        if lines.is_empty() {
            continue;
        }
        let mut block = String::new();
        if let Some(heading) = heading {
            block.push_str(heading);
            block.push('\n');
        }
        block.push_str(&lines.join("\n"));
        blocks.push(block);
    }

    blocks.join("\n\n")
}
