use rand::seq::SliceRandom;

use crate::Bitfield;

// Availability bookkeeping and rarest-first piece selection. The client
// keeps every peer's bitfield (and subsequent `have`s) folded into a single
// per-piece frequency count, then picks among the least-common pieces a
// connected peer actually has, breaking ties randomly so peers don't all
// converge on the same "rarest" piece at once.

#[derive(Clone, Copy, Default, Debug)]
struct PieceInfo {
    // Number of peers that have this piece.
    frequency: usize,
    // Is the piece partially downloaded.
    is_partial: bool,
}

#[derive(Debug)]
pub struct PiecePicker {
    // All pieces in the torrent, idx aligned.
    pieces: Vec<PieceInfo>,
    // The pieces that we have.
    have: Bitfield,
}

impl PiecePicker {

    pub fn new(num_pieces: usize) -> Self {
        let mut have = Bitfield::new();
        have.resize(num_pieces, false);
        Self {
            pieces: vec![PieceInfo::default(); num_pieces],
            have,
        }
    }

    pub fn own_bitfield(&self) -> &Bitfield {
        &self.have
    }

    pub fn all(&self) -> bool {
        self.have.all()
    }

    pub fn set_own_bitfield(&mut self, bf: Bitfield) {
        debug_assert_eq!(bf.len(), self.have.len());
        self.have = bf;
    }

    pub fn increment_piece(&mut self, idx: usize) -> bool {
        assert!(idx < self.pieces.len());
        self.pieces[idx].frequency += 1;
        self.have[idx]
    }

    pub fn received_piece(&mut self, idx: usize) {
        assert!(idx < self.pieces.len());
        self.have.set(idx, true);
    }

    // Will return true if there is at least one piece that peer has and we don't.
    pub fn bitfield_update(&mut self, bf: &Bitfield) -> bool {
        debug_assert_eq!(bf.len(), self.have.len());
        let mut interested = false;
        bf
            .iter()
            .enumerate()
            .filter(|(_, b)| **b)
            .for_each(|(i, _)| {
                self.pieces[i].frequency += 1;
                if !self.have[i] {
                    interested = true;
                }
        });
        interested
    }

    // Rarest-first: among pieces we're missing, not already partial, and
    // that `bf` (the requesting peer) actually has, pick one with the
    // lowest frequency, breaking ties uniformly at random.
    pub fn pick_new_piece(&mut self, bf: &Bitfield) -> Option<usize> {
        let mut candidates = Vec::new();
        let mut min_frequency = usize::MAX;

        for idx in 0..self.have.len() {
            let piece = self.pieces[idx];
            if self.have[idx] || piece.is_partial || piece.frequency == 0 || !bf[idx] {
                continue;
            }
            match piece.frequency.cmp(&min_frequency) {
                std::cmp::Ordering::Less => {
                    min_frequency = piece.frequency;
                    candidates.clear();
                    candidates.push(idx);
                }
                std::cmp::Ordering::Equal => candidates.push(idx),
                std::cmp::Ordering::Greater => {}
            }
        }

        let idx = *candidates.choose(&mut rand::thread_rng())?;
        self.pieces[idx].is_partial = true;
        Some(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitvec::prelude::*;

    #[test]
    fn picks_the_rarest_available_piece() {
        let mut picker = PiecePicker::new(3);
        let all = BitVec::<u8, Msb0>::repeat(true, 3);
        // Piece 0 seen by 3 peers, piece 1 by 1 peer, piece 2 by 2 peers.
        picker.bitfield_update(&all);
        picker.bitfield_update(&all);
        picker.bitfield_update(&BitVec::<u8, Msb0>::from_iter([false, true, true]));

        let picked = picker.pick_new_piece(&all).unwrap();
        assert_eq!(picked, 1, "piece 1 is rarest and should be picked first");
    }

    #[test]
    fn never_repicks_a_piece_already_marked_partial() {
        let mut picker = PiecePicker::new(1);
        let all = BitVec::<u8, Msb0>::repeat(true, 1);
        picker.bitfield_update(&all);

        assert_eq!(picker.pick_new_piece(&all), Some(0));
        assert_eq!(picker.pick_new_piece(&all), None);
    }

    #[test]
    fn skips_pieces_the_requesting_peer_lacks() {
        let mut picker = PiecePicker::new(2);
        let all = BitVec::<u8, Msb0>::repeat(true, 2);
        picker.bitfield_update(&all);

        let peer_bf = BitVec::<u8, Msb0>::from_iter([true, false]);
        assert_eq!(picker.pick_new_piece(&peer_bf), Some(0));
        assert_eq!(picker.pick_new_piece(&peer_bf), None);
    }
}
