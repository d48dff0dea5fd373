//! Prompt text for classification and reply drafting.

use crate::pipeline::types::ResponsePolicy;

/// Maximum characters of message body sent to the model.
const BODY_PREVIEW_CHARS: usize = 4000;

pub fn classification_system_prompt() -> &'static str {
    "You are an email categorization assistant. Respond with ONLY one of these exact labels: \
     Application, Interview, Offer, Rejection, Other."
}

/// Build the classification user prompt for a message body.
pub fn classification_user_prompt(body: &str) -> String {
    format!(
        "You categorize job-related emails. Read the email below and answer with exactly one \
         label and nothing else.\n\n\
         Application: submitting an application, sending a resume or CV, an initial job \
         inquiry, an application status check or confirmation.\n\
         Interview: scheduling, confirming or preparing for an interview, interview feedback \
         or follow-up, technical assessment details.\n\
         Offer: job offer details, salary or compensation, benefits, start dates, offer \
         negotiation, contract details.\n\
         Rejection: the application is declined, the candidate was not selected, suggestions \
         to apply for other roles, feedback on an unsuccessful application.\n\
         Other: anything that does not clearly fit above, such as company news, networking, \
         job alerts, newsletters or marketing.\n\n\
         Labels: Application, Interview, Offer, Rejection, Other\n\n\
         Email content:\n{}",
        preview(body)
    )
}

pub fn reply_system_prompt() -> &'static str {
    "You are an email response assistant."
}

/// Build the reply-drafting prompt for a policy.
pub fn reply_user_prompt(policy: ResponsePolicy, body: &str) -> String {
    let instructions = match policy {
        ResponsePolicy::ConfirmInterview => {
            "Based on the following interview-related email, draft a concise and professional \
             reply that acknowledges the interview details, confirms availability for the \
             proposed time, asks any relevant clarifying questions and expresses enthusiasm \
             for the opportunity. Keep it under 150 words."
        }
        ResponsePolicy::AcknowledgeOffer => {
            "Based on the following job offer email, draft a professional reply that thanks \
             them for the offer, acknowledges the details, asks for a specific timeframe to \
             review it (for example two to three business days) and mentions any points worth \
             discussing. Keep it under 150 words."
        }
        ResponsePolicy::GraciousDecline => {
            "Based on the following rejection email, draft a polite reply that thanks them \
             for the opportunity and their time, accepts the decision gracefully and keeps the \
             door open for future roles. Keep it under 100 words."
        }
    };

    format!(
        "You are a professional job candidate. {instructions}\n\nEmail content:\n{}",
        preview(body)
    )
}

fn preview(body: &str) -> String {
    body.trim().chars().take(BODY_PREVIEW_CHARS).collect()
}
