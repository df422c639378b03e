use std::collections::BTreeSet;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::error::SessionError;
use crate::model::{Answer, Question, QuestionKind};
use crate::session::SessionController;
use crate::state::{Advance, ExitReason, Navigation, Phase, SessionState};
use crate::timer::{format_clock, format_duration, TimerEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Answer(String),
    Next,
    Previous,
    Finish,
    Hint,
    Reset,
    Quit,
    Help,
    Nothing,
}

/// Single letters are commands; `a <text>` forces a text answer that would
/// otherwise read as one.
pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    match line {
        "" => Command::Nothing,
        "start" | "s" => Command::Start,
        "n" | "next" => Command::Next,
        "p" | "prev" => Command::Previous,
        "f" | "finish" => Command::Finish,
        "h" | "hint" => Command::Hint,
        "r" | "reset" => Command::Reset,
        "q" | "quit" => Command::Quit,
        "?" | "help" => Command::Help,
        _ => match line.strip_prefix("a ") {
            Some(rest) => Command::Answer(rest.to_string()),
            None => Command::Answer(line.to_string()),
        },
    }
}

/// Choice numbers are 1-based on screen.
pub fn parse_answer(question: &Question, raw: &str) -> Result<Answer, SessionError> {
    let invalid = |reason: String| SessionError::InvalidAnswer {
        question_id: question.id,
        reason,
    };

    match question.kind {
        QuestionKind::OpenText => Ok(Answer::Text(raw.trim().to_string())),
        QuestionKind::SingleChoice => {
            let choice: usize = raw
                .trim()
                .parse()
                .map_err(|_| invalid(format!("'{}' is not an option number", raw.trim())))?;
            if choice == 0 {
                return Err(invalid("options start at 1".to_string()));
            }
            Ok(Answer::Single(Some(choice - 1)))
        }
        QuestionKind::MultipleChoice => {
            let mut picked = BTreeSet::new();
            for part in raw.split(|c: char| c == ',' || c.is_whitespace()) {
                if part.is_empty() {
                    continue;
                }
                let choice: usize = part
                    .parse()
                    .map_err(|_| invalid(format!("'{}' is not an option number", part)))?;
                if choice == 0 {
                    return Err(invalid("options start at 1".to_string()));
                }
                picked.insert(choice - 1);
            }
            Ok(Answer::Multiple(picked))
        }
    }
}

/// Reads commands from stdin until the session navigates away. Returns where
/// it went.
pub async fn run(controller: &mut SessionController) -> anyhow::Result<Navigation> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    render(controller.state());

    loop {
        if let Some(navigation) = controller.state().exit.clone() {
            render_exit(&navigation);
            return Ok(navigation);
        }

        tokio::select! {
            line = lines.next_line() => {
                match line.context("cannot read from stdin")? {
                    Some(line) => handle_line(controller, &line).await,
                    None => controller.leave(),
                }
            }
            Some(scheduled) = controller.next_event() => {
                let event = scheduled.event.clone();
                controller.handle_event(scheduled).await;
                announce(controller.state(), &event);
            }
        }
    }
}

async fn handle_line(controller: &mut SessionController, line: &str) {
    let result = match parse_command(line) {
        Command::Nothing => Ok(()),
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Quit => {
            controller.leave();
            Ok(())
        }
        Command::Reset => {
            controller.reset();
            render(controller.state());
            Ok(())
        }
        Command::Start => match controller.start().await {
            Ok(()) => {
                render(controller.state());
                Ok(())
            }
            Err(err) => Err(err),
        },
        Command::Next => match controller.next().await {
            Ok(Advance::Moved(_)) | Ok(Advance::AtEnd) => {
                render(controller.state());
                Ok(())
            }
            Err(err) => Err(err),
        },
        Command::Previous => {
            if controller.previous() {
                render(controller.state());
            } else {
                println!("Already at the first question.");
            }
            Ok(())
        }
        Command::Finish => match controller.finish().await {
            Ok(()) => {
                render(controller.state());
                Ok(())
            }
            Err(err) => Err(err),
        },
        Command::Hint => {
            match controller.toggle_hint() {
                Some(hint) => println!("Hint: {}", hint),
                None => println!("(hint hidden)"),
            }
            Ok(())
        }
        Command::Answer(raw) => answer(controller, &raw),
    };

    if let Err(err) = result {
        println!("! {}", err);
    }
}

fn answer(controller: &mut SessionController, raw: &str) -> Result<(), SessionError> {
    let state = controller.state();
    if state.phase != Phase::InProgress {
        return Err(SessionError::NotInProgress);
    }
    let Some(question) = state.current_question() else {
        return Err(SessionError::NotInProgress);
    };
    let question_id = question.id;
    let answer = parse_answer(question, raw)?;
    controller.set_answer(question_id, answer)?;
    println!("Saved.");
    Ok(())
}

fn render(state: &SessionState) {
    if let Some(err) = &state.error {
        println!("! {}", err);
    }
    match state.phase {
        Phase::Unusable => println!("The test cannot be taken right now."),
        Phase::NotStarted => render_intro(state),
        Phase::InProgress | Phase::Submitting => render_question(state),
        Phase::Completed => render_result(state),
        Phase::Abandoned => println!("Your answers could not be submitted."),
    }
}

fn render_intro(state: &SessionState) {
    if let Some(test) = &state.test {
        println!("== {} ==", test.title);
        println!("Questions: {}", test.questions.len());
        match test.duration {
            Some(minutes) => println!("Time limit: {} min", minutes),
            None => println!("No time limit"),
        }
    }
    println!("Type 'start' to begin, '?' for help.");
}

fn render_question(state: &SessionState) {
    let Some(question) = state.current_question() else {
        return;
    };
    println!();
    let clock = state
        .remaining_seconds
        .map(|secs| format!("  [{}]", format_clock(secs)))
        .unwrap_or_default();
    println!(
        "Question {}/{}{}",
        state.current_question + 1,
        state.questions.len(),
        clock
    );
    println!("{}", question.prompt);
    if let Some(image) = &question.image {
        println!("(image: {})", image);
    }

    let selected = |index: usize| match state.answer(question.id) {
        Some(Answer::Single(Some(choice))) => *choice == index,
        Some(Answer::Multiple(choices)) => choices.contains(&index),
        _ => false,
    };
    for (index, option) in question.options().iter().enumerate() {
        let mark = if selected(index) { "x" } else { " " };
        println!("  [{}] {}. {}", mark, index + 1, option);
    }
    if let Some(Answer::Text(text)) = state.answer(question.id) {
        if !text.is_empty() {
            println!("  Your answer: {}", text);
        }
    }
    if state.hint_visible {
        if let Some(hint) = question.hint() {
            println!("  Hint: {}", hint);
        }
    }
    let next = if state.is_last_question() { "f/n finish" } else { "n next" };
    println!("({}, p back, ? help)", next);
}

fn render_result(state: &SessionState) {
    let Some(result) = &state.result else {
        return;
    };
    println!();
    println!("== Result ==");
    println!("Score: {:.0}%", result.score);
    println!(
        "Correct: {} of {}",
        result.correct_count, result.total_questions
    );
    if let Some(spent) = result.time_spent {
        println!("Time: {}", format_duration(spent));
    }
    if let Some(secs) = state.redirect_countdown {
        println!("Leaving in {}s (q to leave now).", secs);
    }
}

fn render_exit(navigation: &Navigation) {
    let why = match navigation.reason {
        ExitReason::RedirectElapsed => "Done.",
        ExitReason::SubmissionAbandoned => "Submission failed too many times.",
        ExitReason::UserLeft => "Left the test.",
    };
    println!("{} Continue at {}", why, navigation.target.path());
}

fn announce(state: &SessionState, event: &TimerEvent) {
    match event {
        TimerEvent::Tick(secs) if *secs % 60 == 0 || *secs <= 10 => {
            println!("[{} left]", format_clock(*secs));
        }
        TimerEvent::TimeExpired | TimerEvent::RetrySubmit => render(state),
        TimerEvent::RedirectTick(left) if *left % 10 == 0 || *left <= 3 => {
            println!("Leaving in {}s", left);
        }
        _ => {}
    }
}

fn print_help() {
    println!("Commands:");
    println!("  start        begin the test");
    println!("  1            pick option 1 (single choice)");
    println!("  1 3          pick options 1 and 3 (multiple choice)");
    println!("  <text>       answer an open question (a <text> if it looks like a command)");
    println!("  n / p        next / previous question");
    println!("  f            finish and submit");
    println!("  h            show or hide the hint");
    println!("  r            forget this attempt locally");
    println!("  q            leave; a running attempt can be resumed later");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(kind: QuestionKind) -> Question {
        Question {
            id: 9,
            prompt: "?".into(),
            kind,
            options: Some(vec!["a".into(), "b".into(), "c".into()]),
            hint: None,
            image: None,
        }
    }

    #[test]
    fn commands_are_recognized() {
        assert_eq!(parse_command(" n "), Command::Next);
        assert_eq!(parse_command("start"), Command::Start);
        assert_eq!(parse_command(""), Command::Nothing);
        assert_eq!(parse_command("2"), Command::Answer("2".into()));
        assert_eq!(parse_command("a n"), Command::Answer("n".into()));
        assert_eq!(
            parse_command("ownership moves"),
            Command::Answer("ownership moves".into())
        );
    }

    #[test]
    fn single_choice_is_one_based() {
        let q = question(QuestionKind::SingleChoice);
        assert_eq!(parse_answer(&q, "2").unwrap(), Answer::Single(Some(1)));
        assert!(matches!(
            parse_answer(&q, "0"),
            Err(SessionError::InvalidAnswer { question_id: 9, .. })
        ));
        assert!(parse_answer(&q, "b").is_err());
    }

    #[test]
    fn multiple_choice_accepts_spaces_and_commas() {
        let q = question(QuestionKind::MultipleChoice);
        assert_eq!(
            parse_answer(&q, "1, 3").unwrap(),
            Answer::Multiple(BTreeSet::from([0, 2]))
        );
        assert_eq!(
            parse_answer(&q, "3 3 1").unwrap(),
            Answer::Multiple(BTreeSet::from([0, 2]))
        );
        assert_eq!(parse_answer(&q, "").unwrap(), Answer::Multiple(BTreeSet::new()));
    }

    #[test]
    fn open_text_is_trimmed() {
        let q = question(QuestionKind::OpenText);
        assert_eq!(
            parse_answer(&q, "  it moves  ").unwrap(),
            Answer::Text("it moves".into())
        );
    }
}
