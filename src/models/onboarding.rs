use serde::{ Serialize, Deserialize };
use std::fmt;
use std::str::FromStr;

use super::call::Message;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Question {
    AboutYou,
    Goals,
    IdealSelf,
}

impl Question {
    pub const ALL: [Question; 3] = [Question::AboutYou, Question::Goals, Question::IdealSelf];
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Question::AboutYou => "aboutYou",
            Question::Goals => "goals",
            Question::IdealSelf => "idealSelf",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Question {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aboutYou" | "about_you" => Ok(Question::AboutYou),
            "goals" => Ok(Question::Goals),
            "idealSelf" | "ideal_self" => Ok(Question::IdealSelf),
            _ => Err(format!("Unknown onboarding question: '{}'", s)),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionResponse {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub assistant_id: Option<String>,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingResponse {
    pub user_id: String,
    #[serde(default)]
    pub about_you: QuestionResponse,
    #[serde(default)]
    pub goals: QuestionResponse,
    #[serde(default)]
    pub ideal_self: QuestionResponse,
    #[serde(default)]
    pub is_completed: bool,
}

impl OnboardingResponse {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            ..Default::default()
        }
    }

    pub fn answer(&self, question: Question) -> &QuestionResponse {
        match question {
            Question::AboutYou => &self.about_you,
            Question::Goals => &self.goals,
            Question::IdealSelf => &self.ideal_self,
        }
    }

    fn answer_mut(&mut self, question: Question) -> &mut QuestionResponse {
        match question {
            Question::AboutYou => &mut self.about_you,
            Question::Goals => &mut self.goals,
            Question::IdealSelf => &mut self.ideal_self,
        }
    }

    /// Stores a completed answer. An answer with no messages is never marked
    /// complete. `is_completed` is recomputed from the three sub-documents.
    pub fn record_answer(
        &mut self,
        question: Question,
        messages: Vec<Message>,
        call_id: &str,
        assistant_id: &str
    ) {
        let completed = !messages.is_empty();
        let slot = self.answer_mut(question);
        slot.messages = messages;
        slot.call_id = Some(call_id.to_string());
        slot.assistant_id = Some(assistant_id.to_string());
        slot.completed = completed;
        self.is_completed = Question::ALL.iter().all(|q| self.answer(*q).completed);
    }

    pub fn next_question(&self) -> Option<Question> {
        Question::ALL.into_iter().find(|q| !self.answer(*q).completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_requires_all_three() {
        let mut doc = OnboardingResponse::new("u1");
        doc.record_answer(Question::AboutYou, vec![Message::user("I'm Ana")], "c1", "a1");
        doc.record_answer(Question::Goals, vec![Message::user("run a marathon")], "c2", "a1");
        assert!(!doc.is_completed);
        assert_eq!(doc.next_question(), Some(Question::IdealSelf));

        doc.record_answer(Question::IdealSelf, vec![Message::user("calm")], "c3", "a1");
        assert!(doc.is_completed);
        assert_eq!(doc.next_question(), None);
    }

    #[test]
    fn empty_answer_stays_incomplete() {
        let mut doc = OnboardingResponse::new("u1");
        doc.record_answer(Question::Goals, Vec::new(), "c1", "a1");
        assert!(!doc.goals.completed);
        assert!(!doc.is_completed);
    }

    #[test]
    fn wire_names_are_camel_case() {
        let doc = OnboardingResponse::new("u1");
        let json = serde_json::to_value(&doc).unwrap();
        assert!(json.get("aboutYou").is_some());
        assert!(json.get("idealSelf").is_some());
        assert_eq!(json["isCompleted"], false);
        assert_eq!("idealSelf".parse::<Question>().unwrap(), Question::IdealSelf);
    }
}
