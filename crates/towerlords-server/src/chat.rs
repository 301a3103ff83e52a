//! Chat (C12, spec §4.12): thin translation between `MatchState::chat_history`
//! and the `CHAT_HISTORY` wire frame. Sending a message is handled directly
//! by the scheduler (it needs the match's exclusive writer); this module
//! only covers the read side, which is not itself a mutation.

use towerlords_core::MatchState;
use towerlords_protocol::wire::{ChatMessageView, ServerFrame};

pub fn history_frame(state: &MatchState) -> ServerFrame {
    ServerFrame::ChatHistory {
        match_id: state.match_id,
        messages: state
            .chat_history
            .ring
            .iter()
            .map(|entry| ChatMessageView {
                user_id: entry.user_id,
                text: entry.text.clone(),
                sent_at: entry.sent_at,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use towerlords_core::config::TowerCurve;
    use towerlords_core::match_state::ChatEntry;
    use towerlords_protocol::ids::{MatchId, Seat, UserId};
    use towerlords_protocol::types::TowerColor;
    use towerlords_core::player_state::PlayerState;

    #[test]
    fn history_frame_carries_every_ring_entry_in_order() {
        let curve = TowerCurve::default();
        let a = PlayerState::new(UserId(uuid::Uuid::new_v4()), Seat(0), TowerColor::Red, vec![], &curve, 5);
        let b = PlayerState::new(UserId(uuid::Uuid::new_v4()), Seat(1), TowerColor::Blue, vec![], &curve, 5);
        let mut state = MatchState::new(MatchId::new(), 1, [a, b], 50);
        let uid = state.players[0].user_id;
        state.chat_history.push(ChatEntry { user_id: uid, text: "hi".into(), sent_at: 1 });
        state.chat_history.push(ChatEntry { user_id: uid, text: "there".into(), sent_at: 2 });

        match history_frame(&state) {
            ServerFrame::ChatHistory { messages, .. } => {
                assert_eq!(messages.len(), 2);
                assert_eq!(messages[0].text, "hi");
                assert_eq!(messages[1].text, "there");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}
