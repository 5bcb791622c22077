// Prompt rendering, reply parsing and template narration
//
// Each source category has its own prompt and reply convention. Replies are
// parsed tolerantly; whatever the model leaves out is filled from a
// deterministic template built from the event's raw attributes.

use serde::Deserialize;

use crate::event::{Event, Narration, SourceCategory, TextVariant};
use crate::llm::LlmMessage;

/// How a category's replies encode the three narration variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyFormat {
    /// `short --- medium --- long`
    Delimited,
    /// `短：.. 中：.. 长：..` (or `Short: ..`)
    Labeled,
    /// `{"short": .., "medium": .., "long": ..}`
    Json,
}

impl ReplyFormat {
    pub fn for_category(category: SourceCategory) -> Self {
        match category {
            SourceCategory::Kill | SourceCategory::Utility => ReplyFormat::Delimited,
            SourceCategory::Economy | SourceCategory::RoundSummary => ReplyFormat::Labeled,
            SourceCategory::Tactical => ReplyFormat::Json,
        }
    }
}

const KILL_SYSTEM_PROMPT: &str = "You are a CS2 professional match caster. Narrate one kill. \
Produce three versions separated by a line containing only ---: \
a short version (under 20 characters), a medium version (about 30 characters) \
and a long version (about 50 characters, mention the weapon and positions). \
Output only the three versions, no titles or notes.";

const UTILITY_SYSTEM_PROMPT: &str = "You are a CS2 professional match caster describing utility usage. \
Describe thrower, landing area, grenade type and its tactical purpose \
(smokes block vision or cover a push, molotovs deny an area, flashes blind for a kill, \
HE grenades deal damage). Produce three versions separated by a line containing only ---: \
short (10-20 characters), medium (25-40 characters), long (50-70 characters). \
Vary the verbs and output only the three versions.";

const ECONOMY_SYSTEM_PROMPT: &str = "You are a CS2 tactical analyst with deep knowledge of economy management. \
From the round's economy data, judge which side has the advantage and why, \
what buy strategy fits (full buy, eco, force buy) and whether saved weapons matter. \
Combine the findings into one causal analysis. Answer in exactly this format:\n\
短：[10-30 characters]\n中：[about 50 characters]\n长：[about 70 characters]";

const ROUND_SUMMARY_SYSTEM_PROMPT: &str = "You are a CS2 professional match caster summarizing a finished round: \
the result and its cause, key kills (opening kill, multi-kills, clutches), standout players \
and bomb plant/defuse execution. Answer in exactly this format:\n\
短：[10-30 characters]\n中：[about 50 characters]\n长：[about 70 characters]";

const TACTICAL_SYSTEM_PROMPT: &str = "You are a CS2 tactical caster. You receive concrete player positions \
and an internal situation assessment. Use the assessment only to understand the play; \
never read internal zone names aloud. Before the bomb is planted focus on the T side's \
intent, after the plant focus on the CT retake. Return a JSON object with the string \
fields short, medium and long.";

const CLUSTER_SYSTEM_PROMPT: &str = "You are a CS2 professional match caster. \
Several events happened within a few seconds. Merge them into one fluent line of \
commentary under 40 characters. Output only that line.";

/// Builds prompts and template narration for every source category
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    half_boundary_round: u32,
    map_name: Option<String>,
}

impl PromptBuilder {
    pub fn new(half_boundary_round: u32) -> Self {
        Self {
            half_boundary_round,
            map_name: None,
        }
    }

    pub fn with_map(mut self, map_name: impl Into<String>) -> Self {
        self.map_name = Some(map_name.into());
        self
    }

    pub fn reply_format(&self, category: SourceCategory) -> ReplyFormat {
        ReplyFormat::for_category(category)
    }

    /// Events that have nothing to narrate by construction
    ///
    /// Economy analysis on the first round of each half has no prior round
    /// to compare against.
    pub fn is_silent(&self, event: &Event) -> bool {
        event.category == SourceCategory::Economy
            && (event.round_number <= 1 || event.round_number == self.half_boundary_round)
    }

    /// System and user messages for one event
    pub fn build(&self, event: &Event) -> Vec<LlmMessage> {
        let system = match event.category {
            SourceCategory::Kill => KILL_SYSTEM_PROMPT,
            SourceCategory::Utility => UTILITY_SYSTEM_PROMPT,
            SourceCategory::Economy => ECONOMY_SYSTEM_PROMPT,
            SourceCategory::RoundSummary => ROUND_SUMMARY_SYSTEM_PROMPT,
            SourceCategory::Tactical => TACTICAL_SYSTEM_PROMPT,
        };
        let mut system = system.to_string();
        if let Some(map) = &self.map_name {
            system.push_str(&format!("\n\nCurrent map: {}", map));
        }

        vec![LlmMessage::system(system), LlmMessage::user(self.user_prompt(event))]
    }

    /// Messages asking for one line that merges a burst of events
    pub fn build_cluster(&self, category: SourceCategory, members: &[&Event]) -> Vec<LlmMessage> {
        let mut user = format!("Round {}, {} events:\n", first_round(members), category);
        for member in members {
            let line = member
                .narration
                .as_ref()
                .and_then(|n| n.pick(&[TextVariant::Short, TextVariant::Medium]))
                .unwrap_or_else(|| self.fallback_narration(member).short);
            user.push_str("- ");
            user.push_str(&line);
            user.push('\n');
        }
        vec![LlmMessage::system(CLUSTER_SYSTEM_PROMPT), LlmMessage::user(user)]
    }

    fn user_prompt(&self, event: &Event) -> String {
        match event.category {
            SourceCategory::Kill => format!(
                "Kill event:\n- Attacker: {}\n- Attacker position: {}\n- Victim: {}\n\
                 - Victim position: {}\n- Weapon: {}\n- Headshot: {}\n- Assist: {}\n\
                 Write the commentary:",
                attr(event, "attacker", "unknown player"),
                attr(event, "attacker_place", "unknown position"),
                attr(event, "victim", "unknown player"),
                attr(event, "victim_place", "unknown position"),
                attr(event, "weapon", "unknown weapon"),
                if is_true(event, "headshot") { "yes" } else { "no" },
                attr(event, "assister", "none"),
            ),
            SourceCategory::Utility => format!(
                "Utility event:\n- Thrower: {}\n- Side: {}\n- Landing area: {}\n\
                 - Grenade type: {}\n- Tick: {}\n\
                 Write the commentary:",
                attr(event, "thrower", "unknown player"),
                attr(event, "side", "unknown side"),
                attr(event, "area", "unknown area"),
                grenade_label(attr(event, "grenade", "")),
                attr(event, "tick", "?"),
            ),
            SourceCategory::Economy | SourceCategory::RoundSummary => {
                let mut prompt = format!("Round {}\n", event.round_number);
                for (key, value) in &event.attributes {
                    prompt.push_str(&format!("{}: {}\n", key, value));
                }
                prompt
            }
            SourceCategory::Tactical => format!(
                "Time: {}\nPhase: {}\nSituation assessment (internal): {}\n\
                 T side ({} alive) positions: {}\nCT side ({} alive) positions: {}\n\
                 Active utility: {}\n\
                 Decide the main direction of play from the assessment and write short, medium and long commentary from the positions.",
                attr(event, "time_range", "?"),
                attr(event, "phase", "?"),
                attr(event, "insight", "none"),
                attr(event, "t_alive", "?"),
                attr(event, "t_positions", "unknown"),
                attr(event, "ct_alive", "?"),
                attr(event, "ct_positions", "unknown"),
                attr(event, "utilities", "none"),
            ),
        }
    }

    /// Deterministic template narration from the raw attributes
    pub fn fallback_narration(&self, event: &Event) -> Narration {
        if self.is_silent(event) {
            return Narration::default();
        }

        match event.category {
            SourceCategory::Kill => {
                let attacker = attr(event, "attacker", "A player");
                let victim = attr(event, "victim", "an opponent");
                let weapon = attr(event, "weapon", "a weapon");
                let place = attr(event, "attacker_place", "the map");
                let headshot = if is_true(event, "headshot") {
                    " with a headshot"
                } else {
                    ""
                };
                let long = match event.attribute("assister").filter(|a| !a.is_empty()) {
                    Some(assister) => format!(
                        "Assisted by {}, {} takes down {} from {} with the {}{}",
                        assister, attacker, victim, place, weapon, headshot
                    ),
                    None => format!(
                        "{} takes down {} from {} with the {}{}",
                        attacker, victim, place, weapon, headshot
                    ),
                };
                Narration::new(
                    format!("{} kills {}", attacker, victim),
                    format!("{} kills {} with the {}", attacker, victim, weapon),
                    long,
                )
            }
            SourceCategory::Utility => {
                let thrower = attr(event, "thrower", "A player");
                let side = attr(event, "side", "?");
                let area = attr(event, "area", "the map");
                let grenade = grenade_label(attr(event, "grenade", ""));
                Narration::new(
                    format!("{} ({}) throws a {} into {}!", thrower, side, grenade, area),
                    format!(
                        "{} ({}) lands a {} on {}, pressuring the opponents!",
                        thrower, side, grenade, area
                    ),
                    format!(
                        "{} ({}) deploys a {} at {}, limiting movement and taking map control!",
                        thrower, side, grenade, area
                    ),
                )
            }
            SourceCategory::Economy => {
                let summary = event
                    .attribute("summary")
                    .map(str::to_string)
                    .unwrap_or_else(|| {
                        format!(
                            "Round {} economy: T spends {}, CT spends {}",
                            event.round_number,
                            attr(event, "t_spend", "unknown"),
                            attr(event, "ct_spend", "unknown"),
                        )
                    });
                truncated_variants(&summary)
            }
            SourceCategory::RoundSummary => {
                let winner = attr(event, "winner", "one side");
                let reason = attr(event, "reason", "the round ends");
                Narration::new(
                    format!("Round {} to {}", event.round_number, winner),
                    format!("{} takes round {}: {}", winner, event.round_number, reason),
                    format!(
                        "Round {} is over. {} takes it as {}",
                        event.round_number, winner, reason
                    ),
                )
            }
            SourceCategory::Tactical => {
                let t_positions = attr(event, "t_positions", "unknown positions");
                let ct_positions = attr(event, "ct_positions", "unknown positions");
                Narration::new(
                    format!("T side sets up at {}", t_positions),
                    format!("T side at {}, CT holding {}", t_positions, ct_positions),
                    format!(
                        "{} T alive at {}, {} CT holding {}",
                        attr(event, "t_alive", "?"),
                        t_positions,
                        attr(event, "ct_alive", "?"),
                        ct_positions
                    ),
                )
            }
        }
    }
}

/// Parse a model reply into narration variants
///
/// Missing variants are left empty; `None` means nothing usable was found.
pub fn parse_reply(text: &str, format: ReplyFormat) -> Option<Narration> {
    let narration = match format {
        ReplyFormat::Delimited => parse_delimited(text),
        ReplyFormat::Labeled => parse_labeled(text),
        ReplyFormat::Json => parse_json(text).unwrap_or_else(|| parse_labeled(text)),
    };
    let narration = narration.sanitize();
    if narration.is_empty() {
        None
    } else {
        Some(narration)
    }
}

fn parse_delimited(text: &str) -> Narration {
    let mut parts = text
        .split("---")
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string);
    Narration::new(
        parts.next().unwrap_or_default(),
        parts.next().unwrap_or_default(),
        parts.next().unwrap_or_default(),
    )
}

fn parse_labeled(text: &str) -> Narration {
    let mut variants: [String; 3] = Default::default();
    let mut current: Option<usize> = None;

    for line in text.lines() {
        let trimmed = line.trim();
        match split_label(trimmed) {
            Some((variant, rest)) => {
                variants[variant] = rest.trim().to_string();
                current = Some(variant);
            }
            None => {
                if let Some(variant) = current {
                    if !trimmed.is_empty() {
                        let slot = &mut variants[variant];
                        if !slot.is_empty() {
                            slot.push(' ');
                        }
                        slot.push_str(trimmed);
                    }
                }
            }
        }
    }

    if current.is_none() {
        return truncated_variants(text.trim());
    }
    let [short, medium, long] = variants;
    Narration::new(short, medium, long)
}

/// Split a leading length label off a line, returning the variant index
fn split_label(line: &str) -> Option<(usize, &str)> {
    const LABELS: [(&str, usize); 6] = [
        ("短", 0),
        ("中", 1),
        ("长", 2),
        ("short", 0),
        ("medium", 1),
        ("long", 2),
    ];
    for (label, variant) in LABELS {
        let Some(head) = line.get(..label.len()) else {
            continue;
        };
        if !head.eq_ignore_ascii_case(label) {
            continue;
        }
        let tail = line[label.len()..].trim_start();
        if let Some(rest) = tail.strip_prefix('：').or_else(|| tail.strip_prefix(':')) {
            return Some((variant, rest));
        }
    }
    None
}

#[derive(Deserialize)]
struct JsonReply {
    #[serde(default)]
    short: String,
    #[serde(default)]
    medium: String,
    #[serde(default)]
    long: String,
}

fn parse_json(text: &str) -> Option<Narration> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    let reply: JsonReply = serde_json::from_str(&text[start..=end]).ok()?;
    Some(Narration::new(reply.short, reply.medium, reply.long))
}

/// Whole text as long, prefixes as medium and short
fn truncated_variants(text: &str) -> Narration {
    Narration::new(
        truncate_chars(text, 30),
        truncate_chars(text, 50),
        text.to_string(),
    )
}

/// First `max` characters of `text`
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Human-readable grenade name from the demo's projectile class
pub fn grenade_label(raw: &str) -> &'static str {
    match raw {
        "smoke" | "smokegrenade" | "CSmokeGrenadeProjectile" => "smoke",
        "inferno" | "molotov" | "incgrenade" | "CMolotovProjectile" => "molotov",
        "flash" | "flashbang" | "CFlashbangProjectile" => "flashbang",
        "he" | "hegrenade" | "CHEGrenadeProjectile" => "HE grenade",
        _ => "grenade",
    }
}

fn attr<'a>(event: &'a Event, key: &str, default: &'a str) -> &'a str {
    event
        .attribute(key)
        .filter(|value| !value.trim().is_empty())
        .unwrap_or(default)
}

fn is_true(event: &Event, key: &str) -> bool {
    matches!(event.attribute(key), Some("true" | "1" | "yes" | "True"))
}

fn first_round(members: &[&Event]) -> u32 {
    members.first().map(|e| e.round_number).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{NativeTimestamp, RawEvent};

    fn kill_event() -> Event {
        Event::from_raw(
            SourceCategory::Kill,
            RawEvent::new("ZywOo", 3, NativeTimestamp::Seconds(12.0), 6)
                .with_attribute("attacker", "ZywOo")
                .with_attribute("victim", "s1mple")
                .with_attribute("weapon", "AWP")
                .with_attribute("headshot", "true"),
        )
    }

    #[test]
    fn test_reply_format_per_category() {
        assert_eq!(ReplyFormat::for_category(SourceCategory::Utility), ReplyFormat::Delimited);
        assert_eq!(ReplyFormat::for_category(SourceCategory::Economy), ReplyFormat::Labeled);
        assert_eq!(ReplyFormat::for_category(SourceCategory::Tactical), ReplyFormat::Json);
    }

    #[test]
    fn test_parse_delimited() {
        let narration = parse_reply("Smoke on A\n---\nA smoke lands\n---\nA long story", ReplyFormat::Delimited)
            .unwrap();
        assert_eq!(narration, Narration::new("Smoke on A", "A smoke lands", "A long story"));
    }

    #[test]
    fn test_parse_delimited_partial() {
        let narration = parse_reply("Only one part", ReplyFormat::Delimited).unwrap();
        assert_eq!(narration.short, "Only one part");
        assert!(narration.medium.is_empty());
        assert!(narration.long.is_empty());
    }

    #[test]
    fn test_parse_labeled() {
        let reply = "短：T方经济劣势\n中：T方上一回合失利，本回合选择eco\n长：T方连续失利导致经济吃紧，\n选择eco为下一回合做准备";
        let narration = parse_reply(reply, ReplyFormat::Labeled).unwrap();
        assert_eq!(narration.short, "T方经济劣势");
        assert_eq!(narration.medium, "T方上一回合失利，本回合选择eco");
        assert_eq!(narration.long, "T方连续失利导致经济吃紧， 选择eco为下一回合做准备");
    }

    #[test]
    fn test_parse_labeled_without_labels_truncates() {
        let text = "x".repeat(80);
        let narration = parse_reply(&text, ReplyFormat::Labeled).unwrap();
        assert_eq!(narration.long.chars().count(), 80);
        assert_eq!(narration.medium.chars().count(), 50);
        assert_eq!(narration.short.chars().count(), 30);
    }

    #[test]
    fn test_parse_json_with_fence() {
        let reply = "```json\n{\"short\": \"T push B\", \"medium\": \"T gather outside B\", \"long\": \"All five T players stack B\"}\n```";
        let narration = parse_reply(reply, ReplyFormat::Json).unwrap();
        assert_eq!(narration.short, "T push B");
        assert_eq!(narration.long, "All five T players stack B");
    }

    #[test]
    fn test_parse_empty_reply() {
        assert!(parse_reply("  --- --- ", ReplyFormat::Delimited).is_none());
        assert!(parse_reply("", ReplyFormat::Labeled).is_none());
    }

    #[test]
    fn test_kill_fallback() {
        let builder = PromptBuilder::new(13);
        let narration = builder.fallback_narration(&kill_event());
        assert_eq!(narration.short, "ZywOo kills s1mple");
        assert!(narration.long.contains("headshot"));
    }

    #[test]
    fn test_economy_silent_rounds() {
        let builder = PromptBuilder::new(13);
        for round in [1, 13] {
            let event = Event::from_raw(
                SourceCategory::Economy,
                RawEvent::new("economy", round, NativeTimestamp::Ticks(100), 1),
            );
            assert!(builder.is_silent(&event));
            assert!(builder.fallback_narration(&event).is_empty());
        }

        let event = Event::from_raw(
            SourceCategory::Economy,
            RawEvent::new("economy", 2, NativeTimestamp::Ticks(100), 1),
        );
        assert!(!builder.is_silent(&event));
        assert!(!builder.fallback_narration(&event).is_empty());
    }

    #[test]
    fn test_build_includes_attributes_and_map() {
        let builder = PromptBuilder::new(13).with_map("de_mirage");
        let messages = builder.build(&kill_event());
        assert_eq!(messages.len(), 2);
        assert!(messages[0].content.contains("de_mirage"));
        assert!(messages[1].content.contains("s1mple"));
        assert!(messages[1].content.contains("Headshot: yes"));
    }

    #[test]
    fn test_grenade_label() {
        assert_eq!(grenade_label("CFlashbangProjectile"), "flashbang");
        assert_eq!(grenade_label("inferno"), "molotov");
        assert_eq!(grenade_label("decoy"), "grenade");
    }
}
