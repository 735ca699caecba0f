//! Personalised engagement emails for scored leads.

use serde_json::Value;
use std::sync::Arc;

use crate::ai_bridge::{parse_json_relaxed, TextModel};
use crate::errors::AppError;
use crate::models::{EnrichedLead, GeneratedEmail};
use crate::store::{BlobKey, HandoffStore};

const EMAIL_INSTRUCTIONS: &str = r#"You are an AI sales assistant writing personalised engagement emails for potential leads.

Based on the lead's profile, lead score, conversion probability, recommended services and interested services, write a professional, engaging email that opens a conversation.

Provide:
- a subject line
- an email body, friendly, concise and focused on their business needs
- a call to action, such as scheduling a meeting or learning more about a service

Return only a JSON object of this shape, without extra text:
{
  "subject": "Accelerate Your Cloud Journey with Expert Support",
  "body": "Hi John, ...",
  "call_to_action": "Schedule a call"
}"#;

pub fn build_email_prompt(lead: &EnrichedLead) -> Result<String, AppError> {
    let data = serde_json::to_string_pretty(lead)?;
    Ok(format!("{}\n\nLead input data:\n{}", EMAIL_INSTRUCTIONS, data))
}

/// Parses the model reply. Anything but an object with non-empty `subject`,
/// `body` and `call_to_action` strings is a `SchemaError`.
pub fn clean_email_response(raw: &str) -> Result<GeneratedEmail, AppError> {
    let value = parse_json_relaxed(raw).map_err(AppError::SchemaError)?;
    let Value::Object(map) = value else {
        return Err(AppError::SchemaError(
            "email reply is not a JSON object".to_string(),
        ));
    };

    let field = |name: &str| {
        map.get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| AppError::SchemaError(format!("email reply is missing '{}'", name)))
    };

    Ok(GeneratedEmail {
        subject: field("subject")?,
        body: field("body")?,
        call_to_action: field("call_to_action")?,
    })
}

/// Generates and remembers outreach emails.
#[derive(Clone)]
pub struct OutreachService {
    model: Option<Arc<dyn TextModel>>,
    store: HandoffStore,
}

impl OutreachService {
    pub fn new(model: Option<Arc<dyn TextModel>>, store: HandoffStore) -> Self {
        Self { model, store }
    }

    pub fn is_enabled(&self) -> bool {
        self.model.is_some()
    }

    /// Asks the model for an email, renders it and stores it as the lead's
    /// last generated email.
    ///
    /// # Arguments
    ///
    /// * `lead` - The merged lead the email is written for.
    ///
    /// # Returns
    ///
    /// * `Result<String, AppError>` - The rendered email text.
    pub async fn generate_email(&self, lead: &EnrichedLead) -> Result<String, AppError> {
        let model = self.model.as_ref().ok_or_else(|| {
            AppError::ServiceUnavailable(
                "Email generation requires GEMINI_API_KEY".to_string(),
            )
        })?;

        tracing::info!("Generating engagement email for lead {}", lead.lead_id());
        let prompt = build_email_prompt(lead)?;
        let raw = model.generate(&prompt).await?;
        let email = clean_email_response(&raw)?;

        let content = email.render();
        self.store
            .write(
                BlobKey::LastGeneratedEmail(lead.lead_id().to_string()),
                content.clone(),
            )
            .await;

        tracing::info!("✓ Email generated for lead {}", lead.lead_id());
        Ok(content)
    }

    pub async fn last_email(&self, lead_id: &str) -> Option<String> {
        self.store
            .read(&BlobKey::LastGeneratedEmail(lead_id.to_string()))
            .await
    }
}
