pub mod employee_options;
