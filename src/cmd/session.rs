//! The `session` subcommand.

use clap::{Args, Subcommand};
use uuid::Uuid;

use crate::{
    prelude::*,
    session::{Session, SessionOpts},
};

use super::{OutputOpts, load_session, open_store};

/// Session command line arguments.
#[derive(Args, Clone, Debug)]
pub struct SessionCmdOpts {
    #[clap(subcommand)]
    pub action: SessionAction,

    #[clap(flatten)]
    pub sessions: SessionOpts,
}

impl SessionCmdOpts {
    /// Output options for whichever action we're running.
    pub fn output(&self) -> &OutputOpts {
        match &self.action {
            SessionAction::Show { output, .. } | SessionAction::List { output } => output,
        }
    }
}

/// What to do with sessions.
#[derive(Clone, Debug, Subcommand)]
pub enum SessionAction {
    /// Show everything stored in one session.
    Show {
        /// The session ID printed by `study-lens ocr`.
        id: Uuid,

        #[clap(flatten)]
        output: OutputOpts,
    },
    /// List saved sessions, oldest first.
    List {
        #[clap(flatten)]
        output: OutputOpts,
    },
}

/// One line of `session list`.
#[derive(Debug, Serialize)]
struct SessionSummary {
    id: Uuid,
    created_at: String,
    files: usize,
    transcript_lines: usize,
    has_summary: bool,
    has_translation: bool,
    questions: usize,
}

impl SessionSummary {
    fn new(session: &Session) -> Self {
        Self {
            id: session.id,
            created_at: session.created_at.to_rfc3339(),
            files: session.input_files.len(),
            transcript_lines: session.transcript.as_ref().map_or(0, |t| t.len()),
            has_summary: session.summary.is_some(),
            has_translation: session.translation.is_some(),
            questions: session.qa_history.len(),
        }
    }
}

/// Plain text view of one session.
fn describe(session: &Session) -> String {
    let mut out = format!(
        "Session {}\nCreated: {}\n",
        session.id,
        session.created_at.to_rfc3339()
    );
    for file in &session.input_files {
        out.push_str(&format!(
            "File: {} ({}, {} bytes)\n",
            file.name, file.mime_type, file.byte_size
        ));
    }
    if let Some(transcript) = &session.transcript {
        out.push_str("\nTranscript:\n");
        out.push_str(&transcript.text());
        out.push('\n');
    }
    if let Some(summary) = &session.summary {
        out.push_str(&format!(
            "\nSummary (grade {}):\n{}\n",
            summary.grade_level, summary.summary
        ));
    }
    if let Some(translation) = &session.translation {
        out.push_str(&format!("\nTranslation ({}):\n", translation.target_language));
        out.push_str(&translation.lines.join("\n"));
        out.push('\n');
    }
    for entry in &session.qa_history {
        out.push_str(&format!("\nQ: {}\nA: {}\n", entry.question, entry.answer));
    }
    out
}

/// The `session` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_session(opts: &SessionCmdOpts) -> Result<()> {
    let store = open_store(&opts.sessions).await?;
    match &opts.action {
        SessionAction::Show { id, output } => {
            let session = load_session(store.as_ref(), *id).await?;
            output.write(&session, || describe(&session)).await
        }
        SessionAction::List { output } => {
            let sessions = store
                .list_sessions()
                .await?
                .iter()
                .map(SessionSummary::new)
                .collect::<Vec<_>>();
            output
                .write(&sessions, || {
                    sessions
                        .iter()
                        .map(|s| {
                            format!("{}  {}  {} lines", s.id, s.created_at, s.transcript_lines)
                        })
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        session::{QaEntry, SessionUpdate},
        text_service::Summary,
        transcript::CombinedTranscript,
    };

    use super::*;

    #[derive(Debug, clap::Parser)]
    struct TestOpts {
        #[clap(flatten)]
        session: SessionCmdOpts,
    }

    #[test]
    fn output_options_follow_the_action() {
        use clap::Parser as _;

        let opts = TestOpts::try_parse_from(["session", "list", "--json"]).unwrap();
        assert!(opts.session.output().json);
        assert!(matches!(opts.session.action, SessionAction::List { .. }));

        let opts = TestOpts::try_parse_from([
            "session",
            "show",
            "6f1c2a52-3b0e-4d5c-9a7e-2f8b1d4c6e90",
            "-o",
            "session.txt",
        ])
        .unwrap();
        assert!(!opts.session.output().json);
        assert_eq!(
            opts.session.output().output_path.as_deref(),
            Some(Path::new("session.txt"))
        );
    }

    #[test]
    fn describes_everything_in_a_session() {
        let mut session = Session::new(vec![]);
        session.apply(SessionUpdate::Transcript {
            input_files: vec![],
            transcript: CombinedTranscript::from_text("Leaves are green."),
            units: vec![],
        });
        session.apply(SessionUpdate::Summary(Summary {
            summary: "Leaves are green.".to_owned(),
            grade_level: "3".to_owned(),
            original_length: 17,
            summary_length: 17,
        }));
        session.qa_history.push(QaEntry::new("What color?", "Green."));

        let text = describe(&session);
        assert!(text.contains("Transcript:\nLeaves are green."));
        assert!(text.contains("Summary (grade 3)"));
        assert!(text.contains("Q: What color?\nA: Green."));

        let summary = SessionSummary::new(&session);
        assert_eq!(summary.transcript_lines, 1);
        assert_eq!(summary.questions, 1);
    }
}
