//! Record sink that posts finished records to a spreadsheet web app.
//!
//! Submission body: `{"secret": ..., "route": ..., "dados": {column: value}}`,
//! with field names translated to the web app's column keys (`fone`, `nome`,
//! `tipo_registro`, ...). Keys without a known column pass through unchanged.
//! Any 2xx response is a success unless the body is JSON carrying
//! `"ok": false` or `"status": "error"`. Returning-contact lookups post
//! `{"secret": ..., "route": "lookup", "cpf": ...}` and read `dados` back.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use intake_core::collaborators::{CollaboratorError, RecordSink, RecordSubmission};
use intake_core::config::RecordSinkConfig;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

const LOOKUP_ROUTE: &str = "lookup";

/// Record field name to web app column key.
const COLUMN_KEYS: &[(&str, &str)] = &[
    ("phone", "fone"),
    ("display_name", "nome_whatsapp"),
    ("channel", "origem_cliente"),
    ("intent", "interesse_inicial"),
    ("record_type", "tipo_registro"),
    ("name", "nome"),
    ("cpf", "cpf"),
    ("birth_date", "nascimento"),
    ("vehicle_type", "tipo_veiculo"),
    ("make_model", "marca_modelo"),
    ("model_year", "ano_modelo"),
    ("mileage", "km"),
    ("fuel", "combustivel"),
    ("plate", "placa"),
    ("postal_code", "cep"),
    ("address", "endereco_completo"),
    ("address_number", "numero"),
    ("complement", "complemento"),
    ("description", "descricao"),
    ("lead_source", "origem"),
    ("purchase_date", "data_compra_veiculo"),
    ("service_date", "data_servico"),
    ("work_order", "ordem_servico"),
    ("feedback", "feedback"),
];

/// Intent identifiers as the web app stores them in `interesse_inicial`.
const INTENT_VALUES: &[(&str, &str)] = &[
    ("service", "servicos"),
    ("part", "pecas"),
    ("post_sale", "pos_venda"),
    ("return_visit", "retorno_oficina"),
    ("address_info", "endereco"),
];

fn translate<'a>(table: &'a [(&'a str, &'a str)], value: &'a str, forward: bool) -> &'a str {
    table
        .iter()
        .find_map(|(ours, theirs)| {
            if forward {
                (*ours == value).then_some(*theirs)
            } else {
                (*theirs == value).then_some(*ours)
            }
        })
        .unwrap_or(value)
}

fn to_columns(fields: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    fields
        .iter()
        .map(|(field, value)| {
            let value = if field == "intent" {
                translate(INTENT_VALUES, value, true)
            } else {
                value.as_str()
            };
            (translate(COLUMN_KEYS, field, true).to_string(), value.to_string())
        })
        .collect()
}

fn from_columns(columns: &serde_json::Map<String, Value>) -> BTreeMap<String, String> {
    columns
        .iter()
        .filter_map(|(column, value)| {
            let value = match value {
                Value::String(text) => text.clone(),
                Value::Number(number) => number.to_string(),
                _ => return None,
            };
            let field = translate(COLUMN_KEYS, column, false);
            let value = if field == "intent" {
                translate(INTENT_VALUES, &value, false).to_string()
            } else {
                value
            };
            Some((field.to_string(), value))
        })
        .collect()
}

#[derive(Serialize)]
struct SubmitBody<'a> {
    secret: &'a str,
    route: &'a str,
    dados: &'a BTreeMap<String, String>,
}

#[derive(Serialize)]
struct LookupBody<'a> {
    secret: &'a str,
    route: &'a str,
    cpf: &'a str,
}

pub struct HttpRecordSink {
    client: Client,
    url: String,
    lookup_enabled: bool,
}

impl HttpRecordSink {
    pub fn from_config(config: &RecordSinkConfig) -> Result<Self, CollaboratorError> {
        let url = config.url.clone().ok_or(CollaboratorError::NotConfigured("record_sink.url"))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| CollaboratorError::Transport(error.to_string()))?;
        Ok(Self { client, url, lookup_enabled: config.lookup_enabled })
    }

    async fn post<B: Serialize + ?Sized>(&self, body: &B) -> Result<Option<Value>, CollaboratorError> {
        let response = self
            .client
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(|error| CollaboratorError::Transport(error.to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(CollaboratorError::Rejected { status: status.as_u16(), body: text });
        }

        let parsed = serde_json::from_str::<Value>(&text).ok();
        if let Some(value) = &parsed {
            let refused = value.get("ok").and_then(Value::as_bool) == Some(false)
                || value.get("status").and_then(Value::as_str) == Some("error");
            if refused {
                return Err(CollaboratorError::Rejected { status: status.as_u16(), body: text });
            }
        }
        Ok(parsed)
    }
}

#[async_trait]
impl RecordSink for HttpRecordSink {
    async fn submit_record(&self, submission: &RecordSubmission) -> Result<(), CollaboratorError> {
        let dados = to_columns(&submission.fields);
        let body = SubmitBody {
            secret: submission.secret.expose_secret(),
            route: &submission.route,
            dados: &dados,
        };

        match self.post(&body).await {
            Ok(_) => {
                info!(
                    event_name = "sink.record.submitted",
                    route = %submission.route,
                    field_count = submission.fields.len(),
                    "record accepted by sink"
                );
                Ok(())
            }
            Err(error) => {
                warn!(
                    event_name = "sink.record.failed",
                    route = %submission.route,
                    error = %error,
                    "record sink rejected submission"
                );
                Err(error)
            }
        }
    }

    async fn lookup_contact(
        &self,
        secret: &SecretString,
        cpf: &str,
    ) -> Result<Option<BTreeMap<String, String>>, CollaboratorError> {
        if !self.lookup_enabled {
            return Ok(None);
        }

        let body = LookupBody { secret: secret.expose_secret(), route: LOOKUP_ROUTE, cpf };
        let Some(value) = self.post(&body).await? else {
            return Err(CollaboratorError::Protocol("lookup response was not JSON".to_string()));
        };

        match value.get("dados") {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(columns)) => Ok(Some(from_columns(columns))),
            Some(other) => {
                Err(CollaboratorError::Protocol(format!("unexpected `dados` in lookup: {other}")))
            }
        }
    }
}
