//! The sequential lab and the contract shared by every dispatcher.

use crucible_core::{CrucibleError, Params, Value};
use crucible_store::Notebook;

use crate::design::{Design, FactorialDesign, ParameterRanges};
use crate::experiment::{Experiment, Runner};

/// Options for [`AsLab::create_with`]: whether to lock the set after a
/// successful construction and whether to clear the lab's ranges before it.
#[derive(Debug, Clone, Copy)]
pub struct CreateOptions {
    /// Finish (lock) the set once the constructor succeeds.
    pub lock_after: bool,
    /// Clear the lab's parameter ranges before running the constructor.
    pub reset_before: bool,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            lock_after: true,
            reset_before: true,
        }
    }
}

/// A laboratory for computational experiments: parameter ranges, a design,
/// and a notebook collecting the records.
///
/// This lab dispatches sequentially, preserving design order end-to-end.
/// [`ParallelLab`](crate::ParallelLab) and [`ClusterLab`](crate::ClusterLab)
/// share the same surface through [`AsLab`].
pub struct Lab {
    ranges: ParameterRanges,
    design: Box<dyn Design>,
    notebook: Notebook,
}

impl std::fmt::Debug for Lab {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lab")
            .field("ranges", &self.ranges)
            .field("notebook", &self.notebook)
            .finish_non_exhaustive()
    }
}

impl Lab {
    /// Creates a lab over the given notebook with the default factorial
    /// design.
    pub fn new(notebook: Notebook) -> Self {
        Self::with_design(notebook, Box::new(FactorialDesign))
    }

    /// Creates a lab with an explicit design.
    pub fn with_design(notebook: Notebook, design: Box<dyn Design>) -> Self {
        Self {
            ranges: ParameterRanges::new(),
            design,
            notebook,
        }
    }

    // ---------- parameter ranges ----------

    /// Sets a parameter range.
    pub fn set_range(&mut self, name: impl Into<String>, values: Vec<Value>) {
        self.ranges.insert(name.into(), values);
    }

    /// Sets a singleton parameter.
    pub fn set_value(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.ranges.insert(name.into(), vec![value.into()]);
    }

    /// Removes a parameter range.
    pub fn del_range(&mut self, name: &str) {
        self.ranges.remove(name);
    }

    /// Clears every parameter range.
    pub fn clear_ranges(&mut self) {
        self.ranges.clear();
    }

    /// The declared parameter names.
    pub fn parameter_names(&self) -> Vec<&str> {
        self.ranges.keys().map(String::as_str).collect()
    }

    /// The declared ranges.
    pub fn ranges(&self) -> &ParameterRanges {
        &self.ranges
    }

    // ---------- the design ----------

    /// Applies the design to the ranges, producing the ordered parameter
    /// points the next run will visit.
    pub fn experiments(&self) -> Result<Vec<Params>, CrucibleError> {
        self.design.space(&self.ranges)
    }

    /// Replaces the design.
    pub fn set_design(&mut self, design: Box<dyn Design>) {
        self.design = design;
    }

    // ---------- the notebook ----------

    /// The notebook collecting this lab's results.
    pub fn notebook(&self) -> &Notebook {
        &self.notebook
    }

    /// Mutable access to the notebook.
    pub fn notebook_mut(&mut self) -> &mut Notebook {
        &mut self.notebook
    }

    /// Consumes the lab, returning its notebook.
    pub fn into_notebook(self) -> Notebook {
        self.notebook
    }

    // ---------- running ----------

    /// Runs the experiment at every point of the design, in design order,
    /// appending the produced records to the notebook's current set and
    /// committing at the end.
    pub fn run_experiment<E: Experiment>(
        &mut self,
        runner: &mut Runner<E>,
    ) -> Result<(), CrucibleError> {
        for point in self.experiments()? {
            runner.set(point);
            let records = runner.run();
            self.notebook.add_results(records)?;
        }
        self.notebook.commit()
    }

    /// True when the current set has no pending results.
    pub fn ready(&self) -> bool {
        self.notebook.current().ready()
    }
}

impl AsLab for Lab {
    fn as_lab(&self) -> &Lab {
        self
    }

    fn as_lab_mut(&mut self) -> &mut Lab {
        self
    }
}

/// The surface shared by every lab variant.
pub trait AsLab {
    /// The shared lab core.
    fn as_lab(&self) -> &Lab;

    /// Mutable access to the shared lab core.
    fn as_lab_mut(&mut self) -> &mut Lab;

    /// Compute-or-reuse construction of a result set.
    ///
    /// If the notebook already contains `tag` the set is selected and nothing
    /// is computed. Otherwise the set is created and selected, the ranges are
    /// optionally cleared, and the constructor runs; on failure the
    /// partially-filled set is deleted and the error propagates, on success
    /// the set is optionally finished (locked). Returns whether the
    /// constructor ran.
    fn create_with(
        &mut self,
        tag: &str,
        description: &str,
        options: CreateOptions,
        ctor: impl FnOnce(&mut Self) -> Result<(), CrucibleError>,
    ) -> Result<bool, CrucibleError>
    where
        Self: Sized,
    {
        if self.as_lab().notebook().contains(tag) {
            self.as_lab_mut().notebook_mut().select(tag)?;
            return Ok(false);
        }
        self.as_lab_mut().notebook_mut().add_result_set(tag, description)?;
        if options.reset_before {
            self.as_lab_mut().clear_ranges();
        }
        match ctor(self) {
            Ok(()) => {
                if options.lock_after {
                    if let Some(set) = self.as_lab_mut().notebook_mut().result_set_mut(tag) {
                        set.finish();
                    }
                }
                self.as_lab_mut().notebook_mut().commit()?;
                Ok(true)
            }
            Err(err) => {
                let notebook = self.as_lab_mut().notebook_mut();
                notebook.delete_result_set(tag)?;
                notebook.commit()?;
                Err(err)
            }
        }
    }
}
