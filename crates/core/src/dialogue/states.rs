use serde::{Deserialize, Serialize};

/// What the contact came for. Chosen once from the main menu.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Service,
    Part,
    PostSale,
    ReturnVisit,
    AddressInfo,
}

impl Intent {
    pub const ALL: [Intent; 5] =
        [Self::Service, Self::Part, Self::PostSale, Self::ReturnVisit, Self::AddressInfo];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Part => "part",
            Self::PostSale => "post_sale",
            Self::ReturnVisit => "return_visit",
            Self::AddressInfo => "address_info",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|intent| intent.as_str() == value)
    }

    /// Record type label written to the sink for this intent.
    pub fn record_type(&self) -> &'static str {
        match self {
            Self::Service => "Serviço",
            Self::Part => "Peça",
            Self::PostSale => "Pós-venda",
            Self::ReturnVisit => "Retorno Oficina",
            Self::AddressInfo => "Endereço",
        }
    }

    pub fn submits_record(&self) -> bool {
        !matches!(self, Self::AddressInfo)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogueState {
    Welcome,
    ReturningContact,
    Name,
    Cpf,
    BirthDate,
    VehicleType,
    MakeModel,
    ModelYear,
    Mileage,
    Fuel,
    Plate,
    PostalCode,
    AddressNumber,
    ComplementChoice,
    ComplementText,
    ServiceDescription,
    PartDescription,
    LeadSource,
    PurchaseDate,
    PostSaleComplaint,
    ServiceDate,
    WorkOrder,
    ReturnComplaint,
    Feedback,
    Confirmation,
}

impl DialogueState {
    pub const ALL: [DialogueState; 25] = [
        Self::Welcome,
        Self::ReturningContact,
        Self::Name,
        Self::Cpf,
        Self::BirthDate,
        Self::VehicleType,
        Self::MakeModel,
        Self::ModelYear,
        Self::Mileage,
        Self::Fuel,
        Self::Plate,
        Self::PostalCode,
        Self::AddressNumber,
        Self::ComplementChoice,
        Self::ComplementText,
        Self::ServiceDescription,
        Self::PartDescription,
        Self::LeadSource,
        Self::PurchaseDate,
        Self::PostSaleComplaint,
        Self::ServiceDate,
        Self::WorkOrder,
        Self::ReturnComplaint,
        Self::Feedback,
        Self::Confirmation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Welcome => "welcome",
            Self::ReturningContact => "returning_contact",
            Self::Name => "name",
            Self::Cpf => "cpf",
            Self::BirthDate => "birth_date",
            Self::VehicleType => "vehicle_type",
            Self::MakeModel => "make_model",
            Self::ModelYear => "model_year",
            Self::Mileage => "mileage",
            Self::Fuel => "fuel",
            Self::Plate => "plate",
            Self::PostalCode => "postal_code",
            Self::AddressNumber => "address_number",
            Self::ComplementChoice => "complement_choice",
            Self::ComplementText => "complement_text",
            Self::ServiceDescription => "service_description",
            Self::PartDescription => "part_description",
            Self::LeadSource => "lead_source",
            Self::PurchaseDate => "purchase_date",
            Self::PostSaleComplaint => "post_sale_complaint",
            Self::ServiceDate => "service_date",
            Self::WorkOrder => "work_order",
            Self::ReturnComplaint => "return_complaint",
            Self::Feedback => "feedback",
            Self::Confirmation => "confirmation",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.as_str() == value)
    }
}

/// Keys of the accumulated record. Declaration order is the order fields are
/// rendered in the confirmation summary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Phone,
    DisplayName,
    Channel,
    Intent,
    RecordType,
    Name,
    Cpf,
    BirthDate,
    VehicleType,
    MakeModel,
    ModelYear,
    Mileage,
    Fuel,
    Plate,
    PostalCode,
    Address,
    AddressNumber,
    Complement,
    Description,
    LeadSource,
    PurchaseDate,
    ServiceDate,
    WorkOrder,
    Feedback,
}

impl Field {
    pub const ALL: [Field; 24] = [
        Self::Phone,
        Self::DisplayName,
        Self::Channel,
        Self::Intent,
        Self::RecordType,
        Self::Name,
        Self::Cpf,
        Self::BirthDate,
        Self::VehicleType,
        Self::MakeModel,
        Self::ModelYear,
        Self::Mileage,
        Self::Fuel,
        Self::Plate,
        Self::PostalCode,
        Self::Address,
        Self::AddressNumber,
        Self::Complement,
        Self::Description,
        Self::LeadSource,
        Self::PurchaseDate,
        Self::ServiceDate,
        Self::WorkOrder,
        Self::Feedback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Phone => "phone",
            Self::DisplayName => "display_name",
            Self::Channel => "channel",
            Self::Intent => "intent",
            Self::RecordType => "record_type",
            Self::Name => "name",
            Self::Cpf => "cpf",
            Self::BirthDate => "birth_date",
            Self::VehicleType => "vehicle_type",
            Self::MakeModel => "make_model",
            Self::ModelYear => "model_year",
            Self::Mileage => "mileage",
            Self::Fuel => "fuel",
            Self::Plate => "plate",
            Self::PostalCode => "postal_code",
            Self::Address => "address",
            Self::AddressNumber => "address_number",
            Self::Complement => "complement",
            Self::Description => "description",
            Self::LeadSource => "lead_source",
            Self::PurchaseDate => "purchase_date",
            Self::ServiceDate => "service_date",
            Self::WorkOrder => "work_order",
            Self::Feedback => "feedback",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.as_str() == value)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Phone => "Telefone",
            Self::DisplayName => "Nome no WhatsApp",
            Self::Channel => "Origem",
            Self::Intent => "Interesse",
            Self::RecordType => "Tipo de registro",
            Self::Name => "Nome",
            Self::Cpf => "CPF",
            Self::BirthDate => "Nascimento",
            Self::VehicleType => "Tipo de veículo",
            Self::MakeModel => "Marca/Modelo",
            Self::ModelYear => "Ano/Modelo",
            Self::Mileage => "KM",
            Self::Fuel => "Combustível",
            Self::Plate => "Placa",
            Self::PostalCode => "CEP",
            Self::Address => "Endereço",
            Self::AddressNumber => "Número",
            Self::Complement => "Complemento",
            Self::Description => "Descrição",
            Self::LeadSource => "Como nos conheceu",
            Self::PurchaseDate => "Data da compra",
            Self::ServiceDate => "Data do serviço",
            Self::WorkOrder => "OS",
            Self::Feedback => "Feedback",
        }
    }

    /// Written at session creation or intent selection rather than collected
    /// from a question. Kept across an edit rewind.
    pub fn is_context(&self) -> bool {
        matches!(
            self,
            Self::Phone | Self::DisplayName | Self::Channel | Self::Intent | Self::RecordType
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "input_kind", content = "input_value", rename_all = "snake_case")]
pub enum Input {
    Text(String),
    Option(String),
}

impl Input {
    pub fn value(&self) -> &str {
        match self {
            Self::Text(value) | Self::Option(value) => value,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub contact_id: String,
    pub display_name: String,
    #[serde(flatten)]
    pub input: Input,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_id: Option<String>,
}

impl InboundEvent {
    pub fn text(contact_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            contact_id: contact_id.into(),
            display_name: String::new(),
            input: Input::Text(text.into()),
            delivery_id: None,
        }
    }

    pub fn option(contact_id: impl Into<String>, option_id: impl Into<String>) -> Self {
        Self {
            contact_id: contact_id.into(),
            display_name: String::new(),
            input: Input::Option(option_id.into()),
            delivery_id: None,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_delivery_id(mut self, delivery_id: impl Into<String>) -> Self {
        self.delivery_id = Some(delivery_id.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyOption {
    pub id: String,
    pub label: String,
}

impl ReplyOption {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self { id: id.into(), label: label.into() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    Text,
    Options,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundPrompt {
    pub contact_id: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<ReplyOption>>,
}

impl OutboundPrompt {
    pub fn text(contact_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self { contact_id: contact_id.into(), body: body.into(), options: None }
    }

    pub fn options(
        contact_id: impl Into<String>,
        body: impl Into<String>,
        options: Vec<ReplyOption>,
    ) -> Self {
        Self { contact_id: contact_id.into(), body: body.into(), options: Some(options) }
    }

    pub fn kind(&self) -> PromptKind {
        if self.options.is_some() {
            PromptKind::Options
        } else {
            PromptKind::Text
        }
    }
}
