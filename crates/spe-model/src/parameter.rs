//! Parameter declarations and the multi-illumination parameter registry.
//!
//! A fit over `N` illuminations declares each physical quantity once. A
//! declaration marked *multi* (e.g. the average illumination) is expanded into
//! `N` entries `name0..name{N-1}`; any other declaration becomes one entry
//! shared by every illumination. The flat parameter vector handed to the
//! minimizer follows the order of the expanded entries, and the lookup table
//! maps each illumination back onto positions in that vector.

use serde::{Deserialize, Serialize};
use spe_core::{Error, Model, Result};
use std::collections::HashMap;

/// One named scalar of a density.
///
/// Values are immutable; the `with_*` methods return an updated copy. The
/// `multi` flag can only be chosen at declaration time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterDecl {
    initial: f64,
    limits: (f64, f64),
    fixed: bool,
    multi: bool,
}

impl ParameterDecl {
    /// Free, shared parameter.
    pub fn new(initial: f64, limits: (f64, f64)) -> Self {
        Self { initial, limits, fixed: false, multi: false }
    }

    /// Same parameter, with one independent value per illumination.
    pub fn multi(mut self) -> Self {
        self.multi = true;
        self
    }

    /// Copy with a new starting value.
    pub fn with_initial(mut self, initial: f64) -> Self {
        self.initial = initial;
        self
    }

    /// Copy with new limits.
    pub fn with_limits(mut self, limits: (f64, f64)) -> Self {
        self.limits = limits;
        self
    }

    /// Copy with a new fixed flag.
    pub fn with_fixed(mut self, fixed: bool) -> Self {
        self.fixed = fixed;
        self
    }

    /// Starting value for the fit
    pub fn initial(&self) -> f64 {
        self.initial
    }

    /// Closed interval of allowed values
    pub fn limits(&self) -> (f64, f64) {
        self.limits
    }

    /// Held at its starting value during the fit
    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    /// Independent value per illumination
    pub fn is_multi(&self) -> bool {
        self.multi
    }
}

fn check_limits(name: &str, (lo, hi): (f64, f64)) -> Result<()> {
    if lo.is_nan() || hi.is_nan() || lo > hi {
        return Err(Error::Validation(format!(
            "invalid limits for parameter '{name}': expected low <= high, got ({lo}, {hi})"
        )));
    }
    Ok(())
}

/// Expanded parameter registry for a simultaneous fit of `n_illuminations`.
#[derive(Debug, Clone)]
pub struct ParameterModel {
    n_illuminations: usize,
    /// Expanded entry names, in flat-vector order.
    names: Vec<String>,
    entries: Vec<ParameterDecl>,
    index: HashMap<String, usize>,
    /// Declared (base) names with their multi flag, in declaration order.
    declared: Vec<(String, bool)>,
    /// `lookup[i][p]`: flat-vector offset of declaration `p` for illumination `i`.
    lookup: Vec<Vec<usize>>,
}

impl ParameterModel {
    /// Expand `declarations` (ordered as the density's positional arguments)
    /// for `n_illuminations`.
    pub fn new(declarations: Vec<(String, ParameterDecl)>, n_illuminations: usize) -> Result<Self> {
        if n_illuminations == 0 {
            return Err(Error::Validation("n_illuminations must be at least 1".into()));
        }
        if declarations.is_empty() {
            return Err(Error::Validation("at least one parameter must be declared".into()));
        }

        let n_declared = declarations.len();
        let mut names = Vec::new();
        let mut entries = Vec::new();
        let mut index = HashMap::new();
        let mut declared = Vec::with_capacity(n_declared);
        let mut lookup = vec![vec![0usize; n_declared]; n_illuminations];

        let mut push = |name: String, decl: ParameterDecl| -> Result<usize> {
            let offset = names.len();
            if index.insert(name.clone(), offset).is_some() {
                return Err(Error::Validation(format!("duplicate parameter name '{name}'")));
            }
            names.push(name);
            entries.push(decl);
            Ok(offset)
        };

        for (i_param, (name, decl)) in declarations.into_iter().enumerate() {
            check_limits(&name, decl.limits)?;
            if decl.multi {
                for (i_illumination, row) in lookup.iter_mut().enumerate() {
                    row[i_param] = push(format!("{name}{i_illumination}"), decl)?;
                }
            } else {
                let offset = push(name.clone(), decl)?;
                for row in lookup.iter_mut() {
                    row[i_param] = offset;
                }
            }
            if declared.iter().any(|(n, _)| *n == name) {
                return Err(Error::Validation(format!("duplicate parameter name '{name}'")));
            }
            declared.push((name, decl.multi));
        }

        Ok(Self { n_illuminations, names, entries, index, declared, lookup })
    }

    /// Number of illuminations fitted simultaneously
    pub fn n_illuminations(&self) -> usize {
        self.n_illuminations
    }

    /// Number of declarations (positional arguments of the density)
    pub fn n_declared(&self) -> usize {
        self.declared.len()
    }

    /// Expanded entry names, in flat-vector order
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Expanded entries, in flat-vector order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParameterDecl)> {
        self.names.iter().map(String::as_str).zip(self.entries.iter())
    }

    /// Expanded entry by name
    pub fn get(&self, name: &str) -> Option<&ParameterDecl> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    /// Whether a declared (base) name was declared multi
    pub fn is_multi(&self, base: &str) -> Option<bool> {
        self.declared.iter().find(|(n, _)| n == base).map(|(_, m)| *m)
    }

    /// `(name, initial)` of every entry, in flat-vector order
    pub fn initial(&self) -> Vec<(String, f64)> {
        self.iter().map(|(n, p)| (n.to_string(), p.initial)).collect()
    }

    /// Starting values, in flat-vector order
    pub fn initial_values(&self) -> Vec<f64> {
        self.entries.iter().map(|p| p.initial).collect()
    }

    /// Number of entries not marked fixed
    pub fn n_free_parameters(&self) -> usize {
        self.entries.iter().filter(|p| !p.fixed).count()
    }

    /// Full lookup table, `n_illuminations × n_declared`
    pub fn lookup(&self) -> &[Vec<usize>] {
        &self.lookup
    }

    /// Lookup row of one illumination
    pub fn lookup_row(&self, i_illumination: usize) -> Result<&[usize]> {
        self.lookup.get(i_illumination).map(Vec::as_slice).ok_or(Error::IndexOutOfRange {
            what: "illumination",
            index: i_illumination,
            len: self.n_illuminations,
        })
    }

    /// Gather the positional arguments of illumination `i_illumination` from a
    /// flat parameter vector into `out`.
    pub fn lookup_parameters_into(
        &self,
        parameters: &[f64],
        i_illumination: usize,
        out: &mut Vec<f64>,
    ) -> Result<()> {
        let row = self.lookup_row(i_illumination)?;
        out.clear();
        for &offset in row {
            let v = parameters.get(offset).ok_or(Error::IndexOutOfRange {
                what: "parameter",
                index: offset,
                len: parameters.len(),
            })?;
            out.push(*v);
        }
        Ok(())
    }

    /// Positional arguments of illumination `i_illumination`.
    pub fn lookup_parameters(&self, parameters: &[f64], i_illumination: usize) -> Result<Vec<f64>> {
        let mut out = Vec::with_capacity(self.n_declared());
        self.lookup_parameters_into(parameters, i_illumination, &mut out)?;
        Ok(out)
    }

    /// Entry offsets addressed by `name`: the entry itself, or every replica
    /// when `name` is the base name of a multi declaration.
    fn resolve(&self, name: &str) -> Result<Vec<usize>> {
        if let Some(&i) = self.index.get(name) {
            return Ok(vec![i]);
        }
        if self.is_multi(name) == Some(true) {
            return Ok((0..self.n_illuminations)
                .map(|i| self.index[&format!("{name}{i}")])
                .collect());
        }
        Err(Error::UnknownParameter(name.to_string()))
    }

    /// Resolve every name before touching any entry, then apply `update`.
    fn apply<'a, T: Copy>(
        &mut self,
        updates: impl IntoIterator<Item = (&'a str, T)>,
        check: impl Fn(&str, T) -> Result<()>,
        update: impl Fn(ParameterDecl, T) -> ParameterDecl,
    ) -> Result<()> {
        let mut resolved = Vec::new();
        for (name, value) in updates {
            check(name, value)?;
            resolved.push((self.resolve(name)?, value));
        }
        for (offsets, value) in resolved {
            for i in offsets {
                self.entries[i] = update(self.entries[i], value);
            }
        }
        Ok(())
    }

    /// Update starting values, keyed by entry name or multi base name.
    pub fn update_initial<'a>(
        &mut self,
        updates: impl IntoIterator<Item = (&'a str, f64)>,
    ) -> Result<()> {
        self.apply(updates, |_, _| Ok(()), ParameterDecl::with_initial)
    }

    /// Update limits, keyed by entry name or multi base name.
    pub fn update_limits<'a>(
        &mut self,
        updates: impl IntoIterator<Item = (&'a str, (f64, f64))>,
    ) -> Result<()> {
        self.apply(updates, check_limits, ParameterDecl::with_limits)
    }

    /// Update fixed flags, keyed by entry name or multi base name.
    pub fn update_fixed<'a>(
        &mut self,
        updates: impl IntoIterator<Item = (&'a str, bool)>,
    ) -> Result<()> {
        self.apply(updates, |_, _| Ok(()), ParameterDecl::with_fixed)
    }
}

impl Model for ParameterModel {
    fn n_parameters(&self) -> usize {
        self.entries.len()
    }

    fn parameter_names(&self) -> Vec<String> {
        self.names.clone()
    }

    fn parameter_init(&self) -> Vec<f64> {
        self.initial_values()
    }

    fn parameter_bounds(&self) -> Vec<(f64, f64)> {
        self.entries.iter().map(|p| p.limits).collect()
    }

    fn parameter_fixed(&self) -> Vec<bool> {
        self.entries.iter().map(|p| p.fixed).collect()
    }

    fn n_free_parameters(&self) -> usize {
        ParameterModel::n_free_parameters(self)
    }
}
