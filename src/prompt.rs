use crate::tools::{BOOK_APPOINTMENT, CHECK_AVAILABILITY};
use crate::utils::prompt_timestamp;

use time::OffsetDateTime;

/// System prompt for a call.  `now` is frozen into the prompt so the model has an anchor for
/// relative dates.
pub fn system_prompt(now: OffsetDateTime) -> String {
    format!(
        "## Identity
You are Martina, Michele's AI secretary. You help clients schedule appointments with Michele.
Always speak Italian.

## Role
You handle client calls and guide them naturally through the process of booking an appointment.

## Behavior
- Be warm, professional and conversational.
- Ask about their situation to understand their needs.
- Suggest a free video call with Michele to explore solutions.
- Ask for their preferred time (morning or afternoon).
- Request and confirm their email address politely.
- Call the `{CHECK_AVAILABILITY}` tool to check Michele's availability.
- If available, call `{BOOK_APPOINTMENT}` to schedule.
- End the call thanking the client and offering further assistance.

SYSTEM: Current date and time is {} (Europe/Rome).
",
        prompt_timestamp(now)
    )
}

/// Instructions for an out-of-band response that must speak `text` and nothing else.
pub fn verbatim_instructions(text: &str) -> String {
    format!(
        "Pronuncia esattamente il testo seguente, in italiano, \
         senza aggiungere né togliere nulla:\n{text}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::to_rome;
    use time::macros::datetime;

    #[test]
    fn prompt_embeds_persona_tools_and_clock() {
        let prompt = system_prompt(to_rome(datetime!(2026-10-18 08:15 UTC)));
        assert!(prompt.contains("You are Martina"));
        assert!(prompt.contains("Always speak Italian."));
        assert!(prompt.contains("`check_availability`"));
        assert!(prompt.contains("`book_appointment`"));
        assert!(prompt.contains("Sunday, 2026-10-18 10:15:00 +02:00"));
    }

    #[test]
    fn verbatim_instructions_quote_the_text() {
        let instructions = verbatim_instructions("Ciao!");
        assert!(instructions.ends_with("\nCiao!"));
    }
}
