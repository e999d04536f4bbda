use std::path::Path;

use serde::Serialize;
use tutorbot_core::config::{AppConfig, LoadOptions};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_llm_credentials(&config));
            checks.push(check_ocr_binary(&config));
            checks.push(check_governor(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["llm_credentials", "ocr_binary", "usage_governor"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let any_failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let overall_status = if any_failed { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if any_failed {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_llm_credentials(config: &AppConfig) -> DoctorCheck {
    let provider = config.llm.provider;
    if !provider.requires_api_key() {
        return DoctorCheck {
            name: "llm_credentials",
            status: CheckStatus::Pass,
            details: format!(
                "{} needs no api key; endpoint {}",
                provider.as_str(),
                config.llm.effective_base_url()
            ),
        };
    }

    // Validation already rejects a missing key for providers that need one.
    DoctorCheck {
        name: "llm_credentials",
        status: CheckStatus::Pass,
        details: format!(
            "{} api key present; model {}",
            provider.as_str(),
            config.llm.effective_model()
        ),
    }
}

fn check_ocr_binary(config: &AppConfig) -> DoctorCheck {
    if !config.ocr.enabled {
        return DoctorCheck {
            name: "ocr_binary",
            status: CheckStatus::Skipped,
            details: "ocr disabled; photo problems will be answered with a no-text reply".to_string(),
        };
    }

    let configured = Path::new(&config.ocr.tesseract_path);
    let resolved = if configured.components().count() > 1 {
        configured.is_file().then(|| configured.to_path_buf())
    } else {
        which::which(configured).ok()
    };

    match resolved {
        Some(path) => DoctorCheck {
            name: "ocr_binary",
            status: CheckStatus::Pass,
            details: format!("found `{}`", path.display()),
        },
        None => DoctorCheck {
            name: "ocr_binary",
            status: CheckStatus::Fail,
            details: format!(
                "`{}` not found; install tesseract or set TUTORBOT_OCR_ENABLED=false",
                config.ocr.tesseract_path
            ),
        },
    }
}

fn check_governor(config: &AppConfig) -> DoctorCheck {
    DoctorCheck {
        name: "usage_governor",
        status: CheckStatus::Pass,
        details: format!(
            "{} requests per {}s; sweep every {}s",
            config.governor.max_requests,
            config.governor.window_seconds,
            config.governor.sweep_interval_secs
        ),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
