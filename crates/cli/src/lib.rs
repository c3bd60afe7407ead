pub mod commands;
pub mod logging;
pub mod notify;

use clap::{Parser, Subcommand, ValueEnum};
use std::process::ExitCode;

use academy_core::config::{AppConfig, LoadOptions};
use academy_core::{ChainAudience, EnrollmentType};

#[derive(Debug, Parser)]
#[command(
    name = "academy",
    about = "Academy enrollment operator CLI",
    long_about = "Enroll users in courses, drive approval chains, inspect seats and eligibility, and manage the database.",
    after_help = "Examples:\n  academy migrate\n  academy seed\n  academy enroll --user U-ALICE --course C-LEAD-201\n  academy approve --actor U-DIRECTOR --enrollment <id> --step STEP-LEAD-3 --type onsite"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the deterministic demo catalog (templates, courses and users)")]
    Seed {
        #[arg(long, help = "Remove seeded rows and their enrollments before loading")]
        reset: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Explain eligibility for one course, or list every course a user may see")]
    Eligibility {
        #[arg(long)]
        user: String,
        #[arg(long)]
        course: Option<String>,
    },
    #[command(about = "Enroll a user in a course and materialize its approval chain")]
    Enroll {
        #[arg(long)]
        user: String,
        #[arg(long)]
        course: String,
    },
    #[command(about = "Approve the next step of an enrollment")]
    Approve {
        #[arg(long)]
        actor: String,
        #[arg(long)]
        enrollment: String,
        #[arg(long)]
        step: String,
        #[arg(long)]
        comments: Option<String>,
        #[arg(long = "type", value_enum, help = "Seat modality, required on the final step")]
        enrollment_type: Option<ModalityArg>,
    },
    #[command(about = "Reject a pending step, which rejects the whole enrollment")]
    Reject {
        #[arg(long)]
        actor: String,
        #[arg(long)]
        enrollment: String,
        #[arg(long)]
        step: String,
        #[arg(long)]
        comments: Option<String>,
    },
    #[command(about = "Withdraw an approved enrollment inside the excuse window")]
    Excuse {
        #[arg(long)]
        user: String,
        #[arg(long)]
        enrollment: String,
    },
    #[command(about = "Cancel an enrollment, releasing any seat it holds")]
    Cancel {
        #[arg(long)]
        actor: String,
        #[arg(long)]
        enrollment: String,
    },
    #[command(about = "Show an enrollment with its approval steps")]
    Chain {
        #[arg(long)]
        enrollment: String,
        #[arg(long, value_enum, default_value_t = AudienceArg::Approver)]
        audience: AudienceArg,
    },
    #[command(about = "Show seats used and remaining per modality")]
    Seats {
        #[arg(long)]
        course: String,
    },
    #[command(about = "List pending enrollments whose next step needs the given role")]
    Inbox {
        #[arg(long)]
        course: String,
        #[arg(long)]
        role: String,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModalityArg {
    Onsite,
    Online,
}

impl From<ModalityArg> for EnrollmentType {
    fn from(value: ModalityArg) -> Self {
        match value {
            ModalityArg::Onsite => Self::Onsite,
            ModalityArg::Online => Self::Online,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum AudienceArg {
    Approver,
    Requester,
}

impl From<AudienceArg> for ChainAudience {
    fn from(value: AudienceArg) -> Self {
        match value {
            AudienceArg::Approver => Self::Approver,
            AudienceArg::Requester => Self::Requester,
        }
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    // Commands report config failures themselves.
    if let Ok(config) = AppConfig::load(LoadOptions::default()) {
        logging::init_logging(&config);
    }

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed { reset } => commands::seed::run(reset),
        Command::Config => commands::config::run(),
        Command::Eligibility { user, course } => {
            commands::query::eligibility(&user, course.as_deref())
        }
        Command::Enroll { user, course } => commands::enrollment::enroll(&user, &course),
        Command::Approve { actor, enrollment, step, comments, enrollment_type } => {
            commands::enrollment::approve(
                &actor,
                &enrollment,
                &step,
                comments,
                enrollment_type.map(EnrollmentType::from),
            )
        }
        Command::Reject { actor, enrollment, step, comments } => {
            commands::enrollment::reject(&actor, &enrollment, &step, comments)
        }
        Command::Excuse { user, enrollment } => commands::enrollment::excuse(&user, &enrollment),
        Command::Cancel { actor, enrollment } => commands::enrollment::cancel(&actor, &enrollment),
        Command::Chain { enrollment, audience } => {
            commands::query::chain(&enrollment, audience.into())
        }
        Command::Seats { course } => commands::query::seats(&course),
        Command::Inbox { course, role } => commands::query::inbox(&course, &role),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};

    use super::{Cli, Command, ModalityArg};

    #[test]
    fn command_definitions_are_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn approve_accepts_final_step_modality() {
        let cli = Cli::try_parse_from([
            "academy",
            "approve",
            "--actor",
            "U-DIRECTOR",
            "--enrollment",
            "E-1",
            "--step",
            "STEP-LEAD-3",
            "--type",
            "online",
        ])
        .expect("approve arguments parse");

        match cli.command {
            Command::Approve { enrollment_type, comments, .. } => {
                assert!(matches!(enrollment_type, Some(ModalityArg::Online)));
                assert!(comments.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn unknown_modality_is_rejected_by_the_parser() {
        let parsed = Cli::try_parse_from([
            "academy", "approve", "--actor", "a", "--enrollment", "e", "--step", "s", "--type",
            "hybrid",
        ]);
        assert!(parsed.is_err());
    }
}
