//! Built-in templates for bookings, reviews, accounts and CRM follow-ups.

use super::{EmailLayout, HandlebarsTemplateRegistry};
use serde::Deserialize;

pub const BOOKING_CONFIRMATION: &str = "booking-confirmation";
pub const BOOKING_CANCELLED: &str = "booking-cancelled";
pub const REVIEW_REQUEST: &str = "review-request";
pub const WELCOME: &str = "welcome";
pub const PASSWORD_RESET: &str = "password-reset";
pub const CRM_CONTACT_FOLLOWUP: &str = "crm-contact-followup";

pub const TEMPLATE_IDS: [&str; 6] = [
    BOOKING_CONFIRMATION,
    BOOKING_CANCELLED,
    REVIEW_REQUEST,
    WELCOME,
    PASSWORD_RESET,
    CRM_CONTACT_FOLLOWUP,
];

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingConfirmationProps {
    pub customer_name: String,
    pub business_name: String,
    pub service_name: String,
    pub date: String,
    pub time: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub booking_reference: Option<String>,
    #[serde(default)]
    pub manage_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingCancelledProps {
    pub customer_name: String,
    pub business_name: String,
    pub service_name: String,
    pub date: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub rebook_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequestProps {
    pub customer_name: String,
    pub business_name: String,
    pub review_url: String,
    #[serde(default)]
    pub service_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WelcomeProps {
    pub name: String,
    pub app_name: String,
    #[serde(default)]
    pub dashboard_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordResetProps {
    pub name: String,
    pub reset_url: String,
    #[serde(default = "default_expiry_hours")]
    pub expiry_hours: u32,
}

fn default_expiry_hours() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrmContactFollowupProps {
    pub contact_name: String,
    pub sender_name: String,
    pub company_name: String,
    pub message: String,
    #[serde(default)]
    pub reply_url: Option<String>,
}

pub fn booking_confirmation(props: BookingConfirmationProps) -> EmailLayout {
    let mut layout = EmailLayout::new(
        format!("Booking confirmed: {} at {}", props.service_name, props.business_name),
        "Your booking is confirmed",
    )
    .preheader(format!("{} on {} at {}", props.service_name, props.date, props.time))
    .paragraph(format!("Hi {},", props.customer_name))
    .paragraph(format!(
        "Thanks for booking with {}. Here are your appointment details.",
        props.business_name
    ))
    .detail("Service", &props.service_name)
    .detail("Date", &props.date)
    .detail("Time", &props.time);

    if let Some(location) = &props.location {
        layout = layout.detail("Location", location);
    }
    if let Some(reference) = &props.booking_reference {
        layout = layout.detail("Reference", reference);
    }
    if let Some(url) = &props.manage_url {
        layout = layout.action("Manage booking", url);
    }
    layout.footer(format!("You received this email because you booked with {}.", props.business_name))
}

pub fn booking_cancelled(props: BookingCancelledProps) -> EmailLayout {
    let mut layout = EmailLayout::new(
        format!("Booking cancelled: {}", props.service_name),
        "Your booking was cancelled",
    )
    .paragraph(format!("Hi {},", props.customer_name))
    .paragraph(format!(
        "Your {} appointment with {} on {} has been cancelled.",
        props.service_name, props.business_name, props.date
    ));

    if let Some(reason) = &props.reason {
        layout = layout.detail("Reason", reason);
    }
    if let Some(url) = &props.rebook_url {
        layout = layout
            .paragraph("We would love to see you another time.")
            .action("Book again", url);
    }
    layout
}

pub fn review_request(props: ReviewRequestProps) -> EmailLayout {
    let visit = match &props.service_name {
        Some(service) => format!("your {} at {}", service, props.business_name),
        None => format!("your visit to {}", props.business_name),
    };
    EmailLayout::new(
        format!("How was {}?", props.business_name),
        "Tell us how it went",
    )
    .paragraph(format!("Hi {},", props.customer_name))
    .paragraph(format!(
        "We hope you enjoyed {}. A short review helps others find great places.",
        visit
    ))
    .action("Leave a review", props.review_url)
}

pub fn welcome(props: WelcomeProps) -> EmailLayout {
    let mut layout = EmailLayout::new(
        format!("Welcome to {}, {}!", props.app_name, props.name),
        format!("Welcome, {}", props.name),
    )
    .paragraph(format!(
        "Your {} account is ready. We're glad to have you.",
        props.app_name
    ));
    if let Some(url) = props.dashboard_url {
        layout = layout.action("Go to dashboard", url);
    }
    layout
}

pub fn password_reset(props: PasswordResetProps) -> EmailLayout {
    let hours = if props.expiry_hours == 1 { "hour" } else { "hours" };
    EmailLayout::new("Reset your password", "Password reset requested")
        .paragraph(format!("Hi {},", props.name))
        .paragraph(format!(
            "Use the link below to choose a new password. It expires in {} {}.",
            props.expiry_hours, hours
        ))
        .action("Reset password", props.reset_url)
        .footer("If you did not request a reset you can ignore this email.")
}

pub fn crm_contact_followup(props: CrmContactFollowupProps) -> EmailLayout {
    let mut layout = EmailLayout::new(
        format!("Following up from {}", props.company_name),
        format!("Hi {}", props.contact_name),
    )
    .paragraph(props.message)
    .paragraph(format!("Best regards,\n{}\n{}", props.sender_name, props.company_name));
    if let Some(url) = props.reply_url {
        layout = layout.action("Reply", url);
    }
    layout
}

pub(super) fn register_all(registry: &mut HandlebarsTemplateRegistry) {
    registry.register(BOOKING_CONFIRMATION, booking_confirmation);
    registry.register(BOOKING_CANCELLED, booking_cancelled);
    registry.register(REVIEW_REQUEST, review_request);
    registry.register(WELCOME, welcome);
    registry.register(PASSWORD_RESET, password_reset);
    registry.register(CRM_CONTACT_FOLLOWUP, crm_contact_followup);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::TemplateRegistry;
    use serde_json::json;

    #[test]
    fn test_booking_confirmation_lists_details() {
        let registry = HandlebarsTemplateRegistry::new().unwrap();
        let rendered = registry
            .render(
                BOOKING_CONFIRMATION,
                &json!({
                    "customerName": "Grace",
                    "businessName": "Acme Spa",
                    "serviceName": "Massage",
                    "date": "2026-11-02",
                    "time": "14:00",
                    "location": "12 Main St",
                }),
            )
            .unwrap();

        assert_eq!(rendered.subject, "Booking confirmed: Massage at Acme Spa");
        assert!(rendered.text.contains("Location: 12 Main St"));
        assert!(rendered.html.contains("12 Main St"));
        assert!(!rendered.text.contains("Manage booking"));
    }

    #[test]
    fn test_password_reset_default_expiry() {
        let layout = password_reset(PasswordResetProps {
            name: "Ada".to_string(),
            reset_url: "https://app.example/reset/abc".to_string(),
            expiry_hours: default_expiry_hours(),
        });
        assert!(layout.paragraphs[1].contains("1 hour."));
        assert_eq!(layout.action.unwrap().url, "https://app.example/reset/abc");
    }

    #[test]
    fn test_review_request_without_service() {
        let layout = review_request(ReviewRequestProps {
            customer_name: "Lin".to_string(),
            business_name: "Cafe Nine".to_string(),
            review_url: "https://reviews.example/r/1".to_string(),
            service_name: None,
        });
        assert!(layout.paragraphs[1].contains("your visit to Cafe Nine"));
    }
}
