//! Alert email bodies, rendered with tera.

use chrono::{DateTime, Utc};
use tera::{Context, Tera};

use crate::database::Job;
use crate::monitoring::escalation::PAUSE_DURATION;
use crate::monitoring::history::FailureRecord;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Subject plus multipart bodies of one alert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub text: String,
    pub html: String,
}

const FAILURE_TEXT: &str = "\
AutoPing Alert - Domain Unreachable
====================================

Your monitored domain has failed to respond after {{ threshold }} consecutive ping attempts.

Domain: {{ url }}
Status: OFFLINE
Check Interval: {{ interval }}
Failure Count: {{ failure_count }} consecutive failures
Last Checked: {{ last_checked }}
Last Result: {{ last_result }}

Failure History:
{% if history | length > 0 %}{% for entry in history %}  {{ loop.index }}. {{ entry.time }} - {{ entry.result }}
{% endfor %}{% else %}No detailed failure history available
{% endif %}
Next Steps:
- AutoPing will pause monitoring for {{ pause_minutes }} minutes
- After {{ pause_minutes }} minutes, normal ping interval will resume
- You will be notified again only if the issue persists

---
This is an automated notification from AutoPing.
Monitoring Job ID: {{ id }} | Generated at {{ generated_at }}
";

const FAILURE_HTML: &str = r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif; color: #333; max-width: 600px; margin: 0 auto;">
  <div style="background: #764ba2; color: white; padding: 24px; text-align: center;">
    <h1 style="margin: 0;">AutoPing Alert</h1>
    <p style="margin: 8px 0 0 0;">Domain Unreachable</p>
  </div>
  <div style="background: #f8f9fa; padding: 24px;">
    <p><strong>Alert:</strong> Your monitored domain has failed to respond after {{ threshold }} consecutive ping attempts.</p>
    <table cellpadding="6">
      <tr><td><b>Domain:</b></td><td><strong>{{ url }}</strong></td></tr>
      <tr><td><b>Status:</b></td><td><span style="background: #dc3545; color: white; padding: 2px 10px;">OFFLINE</span></td></tr>
      <tr><td><b>Check Interval:</b></td><td>{{ interval }}</td></tr>
      <tr><td><b>Failure Count:</b></td><td>{{ failure_count }} consecutive failures</td></tr>
      <tr><td><b>Last Checked:</b></td><td>{{ last_checked }}</td></tr>
      <tr><td><b>Last Result:</b></td><td>{{ last_result }}</td></tr>
    </table>
    <h3>Failure History:</h3>
    <pre style="background: white; padding: 12px;">{% if history | length > 0 %}{% for entry in history %}{{ loop.index }}. {{ entry.time }} - {{ entry.result }}
{% endfor %}{% else %}No detailed failure history available{% endif %}</pre>
    <p><strong>Next Steps:</strong></p>
    <ul>
      <li>AutoPing will pause monitoring for {{ pause_minutes }} minutes</li>
      <li>After {{ pause_minutes }} minutes, normal ping interval will resume</li>
      <li>You will be notified again only if the issue persists</li>
    </ul>
  </div>
  <p style="text-align: center; color: #666; font-size: 12px;">
    This is an automated notification from AutoPing.<br>
    Monitoring Job ID: {{ id }} | Generated at {{ generated_at }}
  </p>
</body>
</html>
"#;

const RECOVERY_TEXT: &str = "\
AutoPing Recovery - Domain Back Online
======================================

Good News! Your monitored domain is now responding successfully!

Domain: {{ url }}
Status: ONLINE
Downtime Duration: {{ downtime }}
Recovery Time: {{ generated_at }}
Check Interval: {{ interval }}
Last Result: {{ last_result }}

Status:
- Domain is responding normally
- AutoPing has resumed normal monitoring at {{ interval }} intervals
- You will be notified if the issue occurs again

---
This is an automated notification from AutoPing.
Monitoring Job ID: {{ id }} | Generated at {{ generated_at }}
";

const RECOVERY_HTML: &str = r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif; color: #333; max-width: 600px; margin: 0 auto;">
  <div style="background: #16a34a; color: white; padding: 24px; text-align: center;">
    <h1 style="margin: 0;">AutoPing Recovery</h1>
    <p style="margin: 8px 0 0 0;">Domain Back Online</p>
  </div>
  <div style="background: #f8f9fa; padding: 24px;">
    <p><strong>Good News:</strong> Your monitored domain is now responding successfully!</p>
    <table cellpadding="6">
      <tr><td><b>Domain:</b></td><td><strong>{{ url }}</strong></td></tr>
      <tr><td><b>Status:</b></td><td><span style="background: #22c55e; color: white; padding: 2px 10px;">ONLINE</span></td></tr>
      <tr><td><b>Downtime Duration:</b></td><td>{{ downtime }}</td></tr>
      <tr><td><b>Recovery Time:</b></td><td>{{ generated_at }}</td></tr>
      <tr><td><b>Check Interval:</b></td><td>{{ interval }}</td></tr>
      <tr><td><b>Last Result:</b></td><td>{{ last_result }}</td></tr>
    </table>
    <ul>
      <li>Domain is responding normally</li>
      <li>AutoPing has resumed normal monitoring at {{ interval }} intervals</li>
      <li>You will be notified if the issue occurs again</li>
    </ul>
  </div>
  <p style="text-align: center; color: #666; font-size: 12px;">
    This is an automated notification from AutoPing.<br>
    Monitoring Job ID: {{ id }} | Generated at {{ generated_at }}
  </p>
</body>
</html>
"#;

fn format_time(at: Option<DateTime<Utc>>) -> String {
    at.map(|at| at.format(TIME_FORMAT).to_string()).unwrap_or_else(|| "N/A".to_string())
}

fn base_context(job: &Job, now: DateTime<Utc>) -> Context {
    let mut context = Context::new();
    context.insert("id", &job.id);
    context.insert("url", &job.url);
    context.insert("interval", job.interval.label());
    context.insert("generated_at", &format_time(Some(now)));
    context
}

fn render(subject: String, context: &Context, text: &str, html: &str) -> tera::Result<RenderedEmail> {
    Ok(RenderedEmail {
        subject,
        text: Tera::one_off(text, context, false)?,
        html: Tera::one_off(html, context, true)?,
    })
}

/// Alert sent when a job is paused after repeated failures
pub fn failure_email(
    job: &Job,
    history: &[FailureRecord],
    now: DateTime<Utc>,
) -> tera::Result<RenderedEmail> {
    let entries: Vec<_> = history
        .iter()
        .map(|record| {
            serde_json::json!({
                "time": format_time(Some(record.time)),
                "result": record.result,
            })
        })
        .collect();

    let mut context = base_context(job, now);
    context.insert("threshold", &crate::monitoring::escalation::FAILURE_THRESHOLD);
    context.insert("failure_count", &job.failure_count);
    context.insert("last_checked", &format_time(job.last_run));
    context.insert("last_result", job.last_result.as_deref().unwrap_or("N/A"));
    context.insert("history", &entries);
    context.insert("pause_minutes", &(PAUSE_DURATION.as_secs() / 60));

    render(format!("AutoPing Alert: {} is DOWN", job.url), &context, FAILURE_TEXT, FAILURE_HTML)
}

/// Alert sent when a job answers again after an escalation
pub fn recovery_email(job: &Job, downtime: &str, now: DateTime<Utc>) -> tera::Result<RenderedEmail> {
    let mut context = base_context(job, now);
    context.insert("downtime", downtime);
    context.insert("last_result", job.last_result.as_deref().unwrap_or("Success"));

    render(
        format!("AutoPing Recovery: {} is BACK ONLINE", job.url),
        &context,
        RECOVERY_TEXT,
        RECOVERY_HTML,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::fixtures::{base_time, job};
    use chrono::TimeDelta;

    fn failures() -> Vec<FailureRecord> {
        (0..3)
            .map(|n| FailureRecord {
                time: base_time() + TimeDelta::seconds(15 * n),
                result: format!("Error: attempt {n}"),
                duration_ms: 10,
            })
            .collect()
    }

    #[test]
    fn test_failure_email() {
        let mut job = job();
        job.failure_count = 3;
        job.last_result = Some("Error: Request failed with status code 502".to_string());

        let email = failure_email(&job, &failures(), base_time()).unwrap();

        assert_eq!(email.subject, "AutoPing Alert: https://example.test/health is DOWN");
        assert!(email.text.contains("Failure Count: 3 consecutive failures"));
        assert!(email.text.contains("  1. 2026-05-04 12:00:00 UTC - Error: attempt 0"));
        assert!(email.text.contains("  3. 2026-05-04 12:00:30 UTC - Error: attempt 2"));
        assert!(email.text.contains("pause monitoring for 5 minutes"));
        assert!(email.html.contains("OFFLINE"));
        assert!(email.html.contains("status code 502"));
    }

    #[test]
    fn test_failure_email_without_history() {
        let email = failure_email(&job(), &[], base_time()).unwrap();
        assert!(email.text.contains("No detailed failure history available"));
        assert!(email.text.contains("Last Checked: N/A"));
    }

    #[test]
    fn test_recovery_email() {
        let mut job = job();
        job.last_result = Some("Success: 200".to_string());

        let email = recovery_email(&job, "2 minutes 5 seconds", base_time()).unwrap();

        assert_eq!(email.subject, "AutoPing Recovery: https://example.test/health is BACK ONLINE");
        assert!(email.text.contains("Downtime Duration: 2 minutes 5 seconds"));
        assert!(email.text.contains("resumed normal monitoring at 1 minute intervals"));
        assert!(email.html.contains("ONLINE"));
    }

    #[test]
    fn test_html_is_escaped() {
        let mut job = job();
        job.last_result = Some("Error: <script>".to_string());

        let email = failure_email(&job, &[], base_time()).unwrap();
        assert!(!email.html.contains("<script>"));
        assert!(email.text.contains("<script>"));
    }
}
