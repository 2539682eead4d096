//! Input handling.
//!
//! A headless client has no keyboard; directions are held as four booleans,
//! the same shape the browser client sends. The bot samples them randomly.

use rand::Rng;
use realm_shared::net::{ClientMessage, MoveCommand};

/// Directions held down at a moment in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputState {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

impl InputState {
    pub fn is_moving(self) -> bool {
        self.up || self.down || self.left || self.right
    }

    /// Random direction set, possibly diagonal, never idle.
    pub fn random(rng: &mut impl Rng) -> Self {
        loop {
            let input = Self {
                up: rng.gen_bool(0.25),
                down: rng.gen_bool(0.25),
                left: rng.gen_bool(0.25),
                right: rng.gen_bool(0.25),
            };
            if input.is_moving() {
                return input;
            }
        }
    }
}

/// Turns sampled input into a `CharacterMove` packet.
pub fn build_command(input: InputState) -> ClientMessage {
    ClientMessage::CharacterMove(MoveCommand {
        up: input.up,
        down: input.down,
        left: input.left,
        right: input.right,
    })
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    #[test]
    fn random_input_always_moves() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!((0..100).all(|_| InputState::random(&mut rng).is_moving()));
    }

    #[test]
    fn command_mirrors_input() {
        let input = InputState {
            up: true,
            right: true,
            ..Default::default()
        };
        assert_eq!(
            build_command(input),
            ClientMessage::CharacterMove(MoveCommand {
                up: true,
                down: false,
                left: false,
                right: true,
            })
        );
    }
}
