//! Stage email templates.

use crate::domain::dunning::DunningStage;
use crate::domain::foundation::Timestamp;
use crate::ports::Notification;

/// A rendered email, ready to hand to a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Values substituted into every template.
#[derive(Debug, Clone)]
pub struct TemplateContext<'a> {
    pub recipient_name: Option<&'a str>,
    pub product_name: &'a str,
    pub billing_url: &'a str,
}

pub fn render(notification: &Notification, ctx: &TemplateContext<'_>) -> RenderedEmail {
    let amount = notification.amount_due.to_string();
    let due = notification
        .due_date_for_next_stage
        .map(format_date)
        .unwrap_or_default();
    let greeting = match ctx.recipient_name {
        Some(name) if !name.trim().is_empty() => format!("Hi {},", name.trim()),
        _ => "Hi,".to_string(),
    };

    let (subject, lines): (String, Vec<String>) = match notification.stage {
        DunningStage::PaymentFailed => (
            format!("Your {} payment didn't go through", ctx.product_name),
            vec![
                format!("We couldn't process your payment of {}.", amount),
                format!(
                    "Please update your payment details before {} to keep your subscription active.",
                    due
                ),
            ],
        ),
        DunningStage::FirstReminder => (
            format!("Reminder: {} is still outstanding", amount),
            vec![
                format!("Your payment of {} is still outstanding.", amount),
                format!("Updating your card takes a minute. Next reminder: {}.", due),
            ],
        ),
        DunningStage::SecondReminder => (
            format!("Action needed: your {} subscription is at risk", ctx.product_name),
            vec![
                format!("We still haven't received {}.", amount),
                format!("Please update your billing details before {}.", due),
            ],
        ),
        DunningStage::FinalWarning => (
            format!("Final notice: your {} subscription will be canceled", ctx.product_name),
            vec![
                format!("This is our last reminder about the outstanding {}.", amount),
                format!(
                    "If we don't receive payment by {}, your subscription will be canceled and your account moved to the free plan.",
                    due
                ),
            ],
        ),
        DunningStage::Canceled => (
            format!("Your {} subscription has been canceled", ctx.product_name),
            vec![
                format!(
                    "We canceled your subscription because the payment of {} could not be collected.",
                    amount
                ),
                "Your account now has free-plan access. You can resubscribe at any time.".to_string(),
            ],
        ),
    };

    let action = if notification.stage == DunningStage::Canceled {
        "Resubscribe"
    } else {
        "Update payment method"
    };

    let mut text = format!("{}\n\n", greeting);
    for line in &lines {
        text.push_str(line);
        text.push_str("\n\n");
    }
    text.push_str(&format!("{}: {}\n", action, ctx.billing_url));

    let mut html = format!("<p>{}</p>", escape(&greeting));
    for line in &lines {
        html.push_str(&format!("<p>{}</p>", escape(line)));
    }
    html.push_str(&format!(
        "<p><a href=\"{}\">{}</a></p>",
        escape(ctx.billing_url),
        action
    ));

    RenderedEmail {
        subject,
        html,
        text,
    }
}

fn format_date(ts: Timestamp) -> String {
    ts.as_datetime().format("%B %-d, %Y").to_string()
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::{DunningRecordId, Money, UserId};

    fn notification(stage: DunningStage, due: Option<Timestamp>) -> Notification {
        Notification {
            record_id: DunningRecordId::new(),
            user_id: UserId::new("user_1").unwrap(),
            stage,
            amount_due: Money::new(4999, "usd").unwrap(),
            due_date_for_next_stage: due,
        }
    }

    fn ctx() -> TemplateContext<'static> {
        TemplateContext {
            recipient_name: Some("Ada"),
            product_name: "Acme",
            billing_url: "https://example.com/billing?a=1&b=2",
        }
    }

    #[test]
    fn first_notice_mentions_amount_and_deadline() {
        let due = Timestamp::from_unix_secs(1_704_326_400).unwrap(); // 2024-01-04
        let email = render(&notification(DunningStage::PaymentFailed, Some(due)), &ctx());

        assert_eq!(email.subject, "Your Acme payment didn't go through");
        assert!(email.text.starts_with("Hi Ada,"));
        assert!(email.text.contains("49.99 USD"));
        assert!(email.text.contains("January 4, 2024"));
    }

    #[test]
    fn cancellation_notice_offers_resubscribe() {
        let email = render(&notification(DunningStage::Canceled, None), &ctx());
        assert!(email.subject.contains("canceled"));
        assert!(email.text.contains("Resubscribe"));
    }

    #[test]
    fn html_escapes_link() {
        let email = render(&notification(DunningStage::FinalWarning, None), &ctx());
        assert!(email.html.contains("a=1&amp;b=2"));
    }

    #[test]
    fn every_stage_has_a_distinct_subject() {
        let subjects: std::collections::HashSet<String> = DunningStage::ALL
            .iter()
            .map(|s| render(&notification(*s, None), &ctx()).subject)
            .collect();
        assert_eq!(subjects.len(), DunningStage::ALL.len());
    }
}
