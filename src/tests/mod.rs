// Test modules for Natgate
// Each module covers the corresponding source module

mod helpers;

mod mapper_tests;
