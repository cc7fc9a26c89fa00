//! Discrete probability distributions over arbitrary elements.
//!
//! Insertion order is preserved; lookups are linear, which is fine for the
//! handful of slots and rule variants a policy generator carries.

use rand::Rng;

use crate::constants::{KL_FLOOR, PROBABILITY_EPSILON};

#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityDistribution<T> {
    elements: Vec<T>,
    probs: Vec<f64>,
}

impl<T> Default for ProbabilityDistribution<T> {
    fn default() -> Self {
        Self {
            elements: Vec::new(),
            probs: Vec::new(),
        }
    }
}

impl<T: PartialEq + Clone> ProbabilityDistribution<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uniform distribution over `elements`.
    pub fn uniform(elements: Vec<T>) -> Self {
        let p = if elements.is_empty() {
            0.0
        } else {
            1.0 / elements.len() as f64
        };
        let probs = vec![p; elements.len()];
        Self { elements, probs }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn contains(&self, element: &T) -> bool {
        self.index_of(element).is_some()
    }

    fn index_of(&self, element: &T) -> Option<usize> {
        self.elements.iter().position(|e| e == element)
    }

    /// Insert or overwrite without renormalising.
    pub fn set(&mut self, element: T, prob: f64) {
        match self.index_of(&element) {
            Some(i) => self.probs[i] = prob.max(0.0),
            None => {
                self.elements.push(element);
                self.probs.push(prob.max(0.0));
            }
        }
    }

    /// Insert `element` with probability `prob`, scaling the others by
    /// `1 - prob` so the total is preserved.
    pub fn add_scaled(&mut self, element: T, prob: f64) {
        let prob = prob.clamp(0.0, 1.0);
        for p in &mut self.probs {
            *p *= 1.0 - prob;
        }
        self.set(element, prob);
    }

    /// Remove `element` and renormalise the rest. Returns its probability.
    pub fn remove(&mut self, element: &T) -> Option<f64> {
        let i = self.index_of(element)?;
        self.elements.remove(i);
        let p = self.probs.remove(i);
        self.normalise();
        Some(p)
    }

    pub fn get(&self, element: &T) -> Option<f64> {
        self.index_of(element).map(|i| self.probs[i])
    }

    pub fn probability(&self, element: &T) -> f64 {
        self.get(element).unwrap_or(0.0)
    }

    pub fn elements(&self) -> &[T] {
        &self.elements
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.probs
    }

    pub fn iter(&self) -> impl Iterator<Item = (&T, f64)> + '_ {
        self.elements.iter().zip(self.probs.iter().copied())
    }

    pub fn total(&self) -> f64 {
        self.probs.iter().sum()
    }

    pub fn is_normalised(&self) -> bool {
        self.is_empty() || (self.total() - 1.0).abs() <= PROBABILITY_EPSILON
    }

    /// Scale to sum 1. An all-zero distribution becomes uniform.
    pub fn normalise(&mut self) {
        let total = self.total();
        if self.is_empty() {
            return;
        }
        if total <= 0.0 || !total.is_finite() {
            let p = 1.0 / self.len() as f64;
            self.probs.iter_mut().for_each(|x| *x = p);
        } else {
            self.probs.iter_mut().for_each(|x| *x /= total);
        }
    }

    /// Roulette-wheel draw. `None` only when empty.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&T> {
        let total = self.total();
        if self.is_empty() {
            return None;
        }
        if total <= 0.0 {
            return self.elements.get(rng.random_range(0..self.len()));
        }
        let mut r = rng.random::<f64>() * total;
        for (e, p) in self.iter() {
            if r < p {
                return Some(e);
            }
            r -= p;
        }
        // Rounding left a sliver past the last bucket.
        self.elements
            .iter()
            .zip(&self.probs)
            .rev()
            .find(|(_, p)| **p > 0.0)
            .map(|(e, _)| e)
    }

    /// Most probable element; ties go to the earliest.
    pub fn argmax(&self) -> Option<&T> {
        let mut best: Option<(&T, f64)> = None;
        for (e, p) in self.iter() {
            if best.map_or(true, |(_, bp)| p > bp) {
                best = Some((e, p));
            }
        }
        best.map(|(e, _)| e)
    }

    /// Weighted ordering without replacement. Zero-mass elements go last in
    /// random order.
    pub fn sample_order<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<T> {
        let mut remaining: Vec<(T, f64)> = self
            .iter()
            .map(|(e, p)| (e.clone(), p))
            .collect();
        let mut order = Vec::with_capacity(remaining.len());
        while !remaining.is_empty() {
            let total: f64 = remaining.iter().map(|(_, p)| p).sum();
            let index = if total <= 0.0 {
                rng.random_range(0..remaining.len())
            } else {
                let mut r = rng.random::<f64>() * total;
                let mut chosen = remaining.len() - 1;
                for (i, (_, p)) in remaining.iter().enumerate() {
                    if r < *p {
                        chosen = i;
                        break;
                    }
                    r -= p;
                }
                chosen
            };
            order.push(remaining.remove(index).0);
        }
        order
    }

    /// Elements by descending probability; ties keep insertion order.
    pub fn descending_order(&self) -> Vec<T> {
        let mut indexed: Vec<(usize, f64)> = self.probs.iter().copied().enumerate().collect();
        indexed.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        indexed
            .into_iter()
            .map(|(i, _)| self.elements[i].clone())
            .collect()
    }

    /// Cross-entropy step towards `targets` (same order as the elements):
    /// `p' = step * target + (1 - step) * p`, then renormalise.
    pub fn update_towards(&mut self, targets: &[f64], step_size: f64) {
        for (p, t) in self.probs.iter_mut().zip(targets) {
            *p = step_size * t + (1.0 - step_size) * *p;
        }
        self.normalise();
    }
}

/// `KL(p || q)` over aligned probability vectors.
pub fn kl_divergence(p: &[f64], q: &[f64]) -> f64 {
    p.iter()
        .zip(q)
        .filter(|(pi, _)| **pi > 0.0)
        .map(|(pi, qi)| pi * (pi / qi.max(KL_FLOOR)).ln())
        .sum::<f64>()
        .max(0.0)
}
