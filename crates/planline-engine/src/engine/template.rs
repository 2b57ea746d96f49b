//! Sheet templates and the catalog built from them at startup.
//!
//! A template fixes a sheet's cells, formulas and permission levels. Every
//! user works on a copy of the values, never of the template, so templates
//! are built once and shared through `Arc`.
//!
//! Building a catalog validates each template (keys, dependencies, cycles,
//! formulas) and sheet references between templates. A template that fails
//! is recorded as rejected and is never served; the others stay available.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use super::cell::{CellError, ComputedValue, ErrorKind, FieldClass, Role};
use super::cell_key::{CellKey, Reference, SheetName};
use super::cycle::detect_cycle;
use super::deps::DependencyGraph;
use super::error::TemplateError;
use super::eval::{FormulaId, FormulaRegistry, InputSource, Resolved};

/// Template definition of one cell.
#[derive(Clone, Debug, PartialEq)]
pub struct CellSpec {
    pub key: CellKey,
    pub formula_id: Option<FormulaId>,
    pub dependencies: Vec<Reference>,
    pub permission_level: Role,
    pub field_class: FieldClass,
}

impl CellSpec {
    pub fn is_input(&self) -> bool {
        self.formula_id.is_none()
    }
}

/// A validated sheet template.
#[derive(Debug)]
pub struct SheetTemplate {
    name: SheetName,
    cells: Vec<CellSpec>,
    graph: DependencyGraph,
    /// cross-sheet reference -> local cells reading it
    external_readers: BTreeMap<(SheetName, CellKey), Vec<CellKey>>,
}

impl SheetTemplate {
    pub fn name(&self) -> SheetName {
        self.name
    }

    /// Cells in declaration order.
    pub fn cells(&self) -> &[CellSpec] {
        &self.cells
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn index_of(&self, key: &CellKey) -> Option<usize> {
        self.graph.index_of(key)
    }

    pub fn cell(&self, key: &CellKey) -> Option<&CellSpec> {
        self.index_of(key).map(|i| &self.cells[i])
    }

    /// Look a key up from untrusted input.
    pub fn find(&self, key: &str) -> Option<&CellSpec> {
        CellKey::parse(key).and_then(|k| self.cell(&k))
    }

    /// Every `(sheet, key)` this template reads from other sheets.
    pub fn external_refs(&self) -> impl Iterator<Item = &(SheetName, CellKey)> {
        self.external_readers.keys()
    }

    /// Sheets this template reads from.
    pub fn referenced_sheets(&self) -> BTreeSet<SheetName> {
        self.external_readers.keys().map(|(sheet, _)| *sheet).collect()
    }

    /// Local cells reading `sheet!key`.
    pub fn readers_of(&self, sheet: SheetName, key: &CellKey) -> &[CellKey] {
        self.external_readers
            .get(&(sheet, key.clone()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Incrementally describes a sheet template.
///
/// Key and reference errors are collected and reported by [`Catalog::build`].
pub struct TemplateBuilder {
    name: SheetName,
    cells: Vec<CellSpec>,
    formulas: Vec<(FormulaId, String)>,
    errors: Vec<TemplateError>,
}

impl TemplateBuilder {
    pub fn new(name: SheetName) -> Self {
        TemplateBuilder {
            name,
            cells: Vec::new(),
            formulas: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn name(&self) -> SheetName {
        self.name
    }

    /// A user-editable input cell.
    pub fn input(self, key: &str, class: FieldClass) -> Self {
        self.input_with_level(key, class, Role::User)
    }

    /// An input cell only admins (or the system) may edit.
    pub fn admin_input(self, key: &str, class: FieldClass) -> Self {
        self.input_with_level(key, class, Role::Admin)
    }

    fn input_with_level(mut self, key: &str, class: FieldClass, level: Role) -> Self {
        if let Some(key) = self.parse_key(key) {
            self.cells.push(CellSpec {
                key,
                formula_id: None,
                dependencies: Vec::new(),
                permission_level: level,
                field_class: class,
            });
        }
        self
    }

    /// A formula cell. The formula is registered as `<sheet>.<key>`.
    pub fn formula(mut self, key: &str, class: FieldClass, source: &str, deps: &[&str]) -> Self {
        let Some(cell_key) = self.parse_key(key) else {
            return self;
        };
        let mut dependencies = Vec::with_capacity(deps.len());
        for dep in deps {
            match dep.parse::<Reference>() {
                Ok(reference) => dependencies.push(reference),
                Err(message) => self.errors.push(TemplateError::InvalidReference {
                    cell: key.to_string(),
                    reference: dep.to_string(),
                    message,
                }),
            }
        }
        let id = FormulaId::new(format!("{}.{}", self.name, key));
        self.formulas.push((id.clone(), source.to_string()));
        self.cells.push(CellSpec {
            key: cell_key,
            formula_id: Some(id),
            dependencies,
            permission_level: Role::System,
            field_class: class,
        });
        self
    }

    /// Add a fully specified cell, e.g. one whose formula is registered elsewhere.
    pub fn cell(mut self, spec: CellSpec) -> Self {
        self.cells.push(spec);
        self
    }

    fn parse_key(&mut self, key: &str) -> Option<CellKey> {
        let parsed = CellKey::parse(key);
        if parsed.is_none() {
            self.errors.push(TemplateError::InvalidKey(key.to_string()));
        }
        parsed
    }

    /// Validate the sheet on its own (no cross-sheet checks).
    fn build(self, registry: &mut FormulaRegistry) -> Result<SheetTemplate, TemplateError> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }
        for (id, source) in &self.formulas {
            registry.register(id.clone(), source)?;
        }

        let mut scope_names = HashSet::new();
        let mut external_readers: BTreeMap<(SheetName, CellKey), Vec<CellKey>> = BTreeMap::new();
        for cell in &self.cells {
            if !scope_names.insert(cell.key.scope_name()) {
                return Err(TemplateError::DuplicateCell(cell.key.clone()));
            }
            match &cell.formula_id {
                None if !cell.dependencies.is_empty() => {
                    return Err(TemplateError::InputWithDependencies(cell.key.clone()));
                }
                Some(id) if !registry.contains(id) => {
                    return Err(TemplateError::UnknownFormula(id.clone()));
                }
                _ => {}
            }
            for dep in &cell.dependencies {
                if let Reference::Sheet(sheet, key) = dep {
                    if *sheet == self.name {
                        return Err(TemplateError::SelfReference(cell.key.clone()));
                    }
                    external_readers
                        .entry((*sheet, key.clone()))
                        .or_default()
                        .push(cell.key.clone());
                }
            }
        }

        let graph = DependencyGraph::build(self.cells.iter().map(|cell| {
            let local = cell.dependencies.iter().filter_map(Reference::local).cloned();
            (cell.key.clone(), local.collect())
        }))?;
        if let Some(cycle) = detect_cycle(&graph) {
            return Err(TemplateError::CycleDetected(cycle));
        }

        Ok(SheetTemplate {
            name: self.name,
            cells: self.cells,
            graph,
            external_readers,
        })
    }
}

/// Every input reads as one; used to dry-run formulas at build time.
struct ProbeInputs;

static PROBE_VALUE: ComputedValue = ComputedValue::Number(1.0);

impl InputSource for ProbeInputs {
    fn resolve(&self, _reference: &Reference) -> Resolved<'_> {
        Resolved::Value(&PROBE_VALUE)
    }
}

/// All sheet templates plus the formula registry they share.
pub struct Catalog {
    registry: FormulaRegistry,
    templates: BTreeMap<SheetName, Arc<SheetTemplate>>,
    rejected: BTreeMap<SheetName, TemplateError>,
}

impl Catalog {
    /// The standard business sheets.
    pub fn standard() -> Catalog {
        Catalog::build(crate::templates::standard_templates())
    }

    /// Validate and build templates. Failures are recorded per sheet.
    pub fn build(builders: Vec<TemplateBuilder>) -> Catalog {
        let mut registry = FormulaRegistry::new();
        let mut templates = BTreeMap::new();
        let mut rejected = BTreeMap::new();

        for builder in builders {
            let name = builder.name();
            if templates.contains_key(&name) || rejected.contains_key(&name) {
                tracing::warn!(sheet = %name, "duplicate template ignored");
                continue;
            }
            match builder.build(&mut registry).and_then(|t| probe(&t, &registry).map(|_| t)) {
                Ok(template) => {
                    templates.insert(name, Arc::new(template));
                }
                Err(err) => {
                    rejected.insert(name, err);
                }
            }
        }

        check_sheet_references(&mut templates, &mut rejected);

        for (sheet, err) in &rejected {
            tracing::error!(sheet = %sheet, error = %err, "sheet template rejected");
        }
        tracing::debug!(
            available = templates.len(),
            formulas = registry.len(),
            "catalog built"
        );

        Catalog {
            registry,
            templates,
            rejected,
        }
    }

    pub fn registry(&self) -> &FormulaRegistry {
        &self.registry
    }

    /// The template for `sheet`, or why it is not served.
    pub fn template(&self, sheet: SheetName) -> Result<&Arc<SheetTemplate>, TemplateError> {
        match self.templates.get(&sheet) {
            Some(template) => Ok(template),
            None => Err(self
                .rejected
                .get(&sheet)
                .cloned()
                .unwrap_or(TemplateError::UnavailableSheet(sheet))),
        }
    }

    pub fn is_available(&self, sheet: SheetName) -> bool {
        self.templates.contains_key(&sheet)
    }

    pub fn templates(&self) -> impl Iterator<Item = &Arc<SheetTemplate>> {
        self.templates.values()
    }

    pub fn rejected(&self) -> impl Iterator<Item = (SheetName, &TemplateError)> {
        self.rejected.iter().map(|(sheet, err)| (*sheet, err))
    }
}

/// Dry-run every formula with all inputs set to one. A formula that reads
/// something it did not declare fails here instead of on a user's edit.
fn probe(template: &SheetTemplate, registry: &FormulaRegistry) -> Result<(), TemplateError> {
    for cell in template.cells().iter().filter(|c| !c.is_input()) {
        let Some(id) = &cell.formula_id else { continue };
        match registry.evaluate_cell(cell, &ProbeInputs) {
            Ok(_) => {}
            Err(CellError::Raised(ErrorKind::MissingDependency)) => {
                return Err(TemplateError::UndeclaredReference {
                    formula: id.clone(),
                    message: format!("declared inputs: {:?}", cell.dependencies),
                });
            }
            Err(CellError::Raised(ErrorKind::FormulaError)) => {
                return Err(TemplateError::Compile {
                    formula: id.clone(),
                    message: "formula failed on probe inputs".to_string(),
                });
            }
            // Division by a probe-derived zero and similar data errors are fine.
            Err(_) => {}
        }
    }
    Ok(())
}

/// Reject templates whose sheet references point at missing sheets or cells,
/// at rejected sheets, or form a cycle between sheets.
fn check_sheet_references(
    templates: &mut BTreeMap<SheetName, Arc<SheetTemplate>>,
    rejected: &mut BTreeMap<SheetName, TemplateError>,
) {
    loop {
        let mut newly_rejected: HashMap<SheetName, TemplateError> = HashMap::new();
        for (name, template) in templates.iter() {
            for (sheet, key) in template.external_refs() {
                let failure = match templates.get(sheet) {
                    Some(target) if target.cell(key).is_none() => {
                        let reader = template.readers_of(*sheet, key)[0].clone();
                        Some(TemplateError::UnknownDependency {
                            cell: reader,
                            dependency: Reference::Sheet(*sheet, key.clone()),
                        })
                    }
                    Some(_) => None,
                    None => Some(TemplateError::UnavailableSheet(*sheet)),
                };
                if let Some(err) = failure {
                    newly_rejected.entry(*name).or_insert(err);
                }
            }
        }
        if newly_rejected.is_empty() {
            break;
        }
        for (name, err) in newly_rejected {
            templates.remove(&name);
            rejected.insert(name, err);
        }
    }

    if let Some(cycle) = sheet_cycle(templates) {
        for sheet in &cycle {
            templates.remove(sheet);
            rejected.insert(*sheet, TemplateError::SheetCycle(cycle.clone()));
        }
        // Sheets reading a removed sheet are no longer servable either.
        check_sheet_references(templates, rejected);
    }
}

fn sheet_cycle(templates: &BTreeMap<SheetName, Arc<SheetTemplate>>) -> Option<Vec<SheetName>> {
    fn visit(
        sheet: SheetName,
        templates: &BTreeMap<SheetName, Arc<SheetTemplate>>,
        path: &mut Vec<SheetName>,
        done: &mut HashSet<SheetName>,
    ) -> Option<Vec<SheetName>> {
        if let Some(pos) = path.iter().position(|s| *s == sheet) {
            return Some(path[pos..].to_vec());
        }
        if done.contains(&sheet) {
            return None;
        }
        path.push(sheet);
        if let Some(template) = templates.get(&sheet) {
            for next in template.referenced_sheets() {
                if let Some(cycle) = visit(next, templates, path, done) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        done.insert(sheet);
        None
    }

    let mut done = HashSet::new();
    for sheet in templates.keys() {
        let mut path = Vec::new();
        if let Some(cycle) = visit(*sheet, templates, &mut path, &mut done) {
            return Some(cycle);
        }
    }
    None
}
